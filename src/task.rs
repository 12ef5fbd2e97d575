//! Task execution
//!
//! Anything that runs to completion and yields a [`ResultNode`] is a
//! [`TaskProducer`]. [`CommandTask`] is the stock producer: a list of shell
//! commands run one after another.
//!
//! ```no_run
//! use pipeline_results::task::{CommandTask, TaskProducer};
//!
//! # async fn demo() -> Result<(), pipeline_results::task::TaskError> {
//! let task = CommandTask::new("Style check", ["cargo fmt --check", "cargo clippy"])
//!     .fail_fast(true)
//!     .log_file("./ci/tmp/style_check.log");
//! let result = task.run().await?;
//! println!("{}: {}", result.name, result.status);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};

use crate::result::{ResultError, ResultNode, Status, Stopwatch};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task [{0}] has no commands")]
    NoCommands(String),

    #[error("Failed to execute command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Result(#[from] ResultError),
}

/// Something that runs to completion and reports how it went
#[async_trait]
pub trait TaskProducer: Send + Sync {
    fn name(&self) -> &str;

    /// Run the task. An `Err` is a fault of the task machinery itself, not a
    /// failing task; failures are reported through the returned status.
    async fn run(&self) -> Result<ResultNode, TaskError>;
}

/// Run `task`, turning a fault into an `error` result named after it
pub async fn run_to_result(task: &dyn TaskProducer) -> ResultNode {
    match task.run().await {
        Ok(result) => result,
        Err(e) => {
            error!(task = %task.name(), error = %e, "Task failed to run");
            ResultNode::new(task.name(), Status::Error).with_info(&e.to_string())
        }
    }
}

/// Shell commands run through `sh -c`, in order
#[derive(Debug, Clone)]
pub struct CommandTask {
    name: String,
    commands: Vec<String>,
    fail_fast: bool,
    workdir: Option<PathBuf>,
    log_file: Option<PathBuf>,
    with_info: bool,
}

impl CommandTask {
    pub fn new<I, S>(name: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            commands: commands.into_iter().map(Into::into).collect(),
            fail_fast: false,
            workdir: None,
            log_file: None,
            with_info: false,
        }
    }

    /// Stop at the first failing command
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn workdir(mut self, dir: impl AsRef<Path>) -> Self {
        self.workdir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Write the combined output here and attach it to the result
    pub fn log_file(mut self, path: impl AsRef<Path>) -> Self {
        self.log_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Copy the combined output into the result's info
    pub fn with_info(mut self, with_info: bool) -> Self {
        self.with_info = with_info;
        self
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    async fn run_command(&self, command: &str, output: &mut String) -> Result<bool, TaskError> {
        info!(task = %self.name, command, "Executing command");

        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let result = cmd.output().await.map_err(|source| TaskError::Spawn {
            command: command.to_string(),
            source,
        })?;

        output.push_str(&String::from_utf8_lossy(&result.stdout));
        output.push_str(&String::from_utf8_lossy(&result.stderr));

        if result.status.success() {
            return Ok(true);
        }

        let code = result.status.code().unwrap_or(-1);
        error!(task = %self.name, command, code, "Command failed");
        output.push_str(&format!("Command [{command}] exited with code {code}\n"));
        Ok(false)
    }
}

#[async_trait]
impl TaskProducer for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<ResultNode, TaskError> {
        if self.commands.is_empty() {
            return Err(TaskError::NoCommands(self.name.clone()));
        }

        let stopwatch = Stopwatch::start();
        let mut output = String::new();
        let mut success = true;

        for command in &self.commands {
            if !self.run_command(command, &mut output).await? {
                success = false;
                if self.fail_fast {
                    break;
                }
            }
        }

        let mut result = ResultNode::from_outcome(self.name.clone(), success).with_stopwatch(&stopwatch);

        if self.with_info {
            let text = output.trim_end();
            if !text.is_empty() {
                result.append_info(text);
            }
        }

        if let Some(path) = &self.log_file {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| TaskError::Log {
                        path: path.clone(),
                        source,
                    })?;
            }
            tokio::fs::write(path, &output)
                .await
                .map_err(|source| TaskError::Log {
                    path: path.clone(),
                    source,
                })?;
            result.attach_files([path])?;
        }

        info!(task = %self.name, status = %result.status, "Task finished");
        Ok(result)
    }
}
