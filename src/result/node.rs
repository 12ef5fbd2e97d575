//! Recursive result document
//!
//! A [`ResultNode`] is the outcome of one task together with the outcomes of
//! its sub-tasks. The same structure describes a single test case, a job and
//! a whole workflow run; the workflow-level node is the document that every
//! worker merges its job results into.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::aggregate::aggregate;
use super::error::ResultError;
use super::status::Status;
use super::stopwatch::{now_timestamp, Stopwatch};

/// Failing children are listed by name only below this count
const MAX_FAILED_NAMES_IN_SUMMARY: usize = 10;

/// Outcome of a task and its nested sub-tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNode {
    /// Unique among siblings, used as the merge key
    pub name: String,

    pub status: Status,

    /// Unix seconds, unset until the task starts
    #[serde(default)]
    pub start_time: Option<f64>,

    /// Seconds, fixed once the task reaches a terminal status
    #[serde(default)]
    pub duration: Option<f64>,

    /// Ordered sub-results
    #[serde(default)]
    pub results: Vec<ResultNode>,

    /// Local artifacts not yet published
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Durable artifact links
    #[serde(default)]
    pub links: Vec<String>,

    /// Free-form, newline separated, append-only
    #[serde(default)]
    pub info: String,

    /// Auxiliary structured data, merged by key
    #[serde(default)]
    pub ext: BTreeMap<String, Value>,
}

impl ResultNode {
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Self {
            name: name.into(),
            status,
            start_time: None,
            duration: None,
            results: Vec::new(),
            files: Vec::new(),
            links: Vec::new(),
            info: String::new(),
            ext: BTreeMap::new(),
        }
    }

    /// A registered task that has not started
    pub fn pending(name: impl Into<String>) -> Self {
        Self::new(name, Status::Pending)
    }

    pub fn skipped(name: impl Into<String>, info: impl Into<String>) -> Self {
        let mut node = Self::new(name, Status::Skipped);
        node.info = info.into();
        node
    }

    /// Leaf result from a plain pass/fail outcome
    pub fn from_outcome(name: impl Into<String>, success: bool) -> Self {
        let status = if success {
            Status::Success
        } else {
            Status::Failure
        };
        Self::new(name, status)
    }

    /// Build a finished result from already finished sub-results.
    ///
    /// Unlike the rollup used for live documents, an errored child makes the
    /// whole result an error rather than a failure. A child that is still
    /// pending or running is reported as an error, since the caller claimed
    /// the work was done.
    pub fn from_results(name: impl Into<String>, results: Vec<ResultNode>) -> Self {
        let name = name.into();
        let mut status = Status::Success;

        for result in &results {
            match result.status {
                Status::Success | Status::Skipped => {}
                Status::Failure => status = Status::Failure,
                Status::Error => {
                    status = Status::Error;
                    break;
                }
                Status::Pending | Status::Running => {
                    warn!(
                        result = %name,
                        sub_result = %result.name,
                        status = %result.status,
                        "Unexpected unfinished sub-result"
                    );
                    status = Status::Error;
                    break;
                }
            }
        }

        let mut node = Self::new(name, status);
        node.results = results;
        node
    }

    pub fn with_stopwatch(mut self, stopwatch: &Stopwatch) -> Self {
        self.set_timing(stopwatch);
        self
    }

    pub fn with_info(mut self, info: &str) -> Self {
        self.append_info(info);
        self
    }

    /// Copy every sub-result's info into this node as `"<name>: <info>"`
    pub fn collect_info_from_results(&mut self) -> &mut Self {
        let lines: Vec<String> = self
            .results
            .iter()
            .filter(|r| !r.info.is_empty())
            .map(|r| format!("{}: {}", r.name, r.info))
            .collect();
        for line in lines {
            self.append_info(&line);
        }
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    pub fn set_status(&mut self, status: Status) -> &mut Self {
        self.status = status;
        self
    }

    /// Mark the task running and record its start time
    pub fn start(&mut self) -> &mut Self {
        if self.start_time.is_none() {
            self.start_time = Some(now_timestamp());
        }
        self.status = Status::Running;
        self
    }

    /// Move to a terminal status and fix the duration
    pub fn finish(&mut self, status: Status) -> &mut Self {
        if self.status.is_completed() && self.duration.is_some() {
            warn!(
                result = %self.name,
                from = %self.status,
                to = %status,
                "Result already completed, duration is kept"
            );
        }
        self.status = status;
        if status.is_completed() {
            self.update_duration();
        }
        self
    }

    /// Attach local artifact files.
    ///
    /// Every path must be an existing file: publishing happens later, when a
    /// missing file can no longer be produced. Paths already attached are
    /// dropped with a warning. Nothing is attached if any path is invalid.
    pub fn attach_files<I, P>(&mut self, files: I) -> Result<&mut Self, ResultError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let files: Vec<PathBuf> = files.into_iter().map(Into::into).collect();

        if let Some(missing) = files.iter().find(|f| !f.is_file()) {
            return Err(ResultError::MissingFile {
                result: self.name.clone(),
                path: missing.clone(),
            });
        }

        for file in files {
            if self.files.contains(&file) {
                warn!(
                    result = %self.name,
                    file = %file.display(),
                    "File is already present in result, skipping"
                );
                continue;
            }
            self.files.push(file);
        }
        Ok(self)
    }

    pub fn append_info(&mut self, info: &str) -> &mut Self {
        if !self.info.is_empty() {
            self.info.push('\n');
        }
        self.info.push_str(info);
        self
    }

    pub fn add_link(&mut self, link: impl Into<String>) -> &mut Self {
        self.links.push(link.into());
        self
    }

    pub fn set_ext(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.ext.insert(key.into(), value);
        self
    }

    /// Fix `duration` from `start_time` if it is not set yet.
    ///
    /// Without a start time there is nothing to measure from and the call
    /// only logs a note.
    pub fn update_duration(&mut self) -> &mut Self {
        if self.duration.is_some() {
            return self;
        }
        match self.start_time {
            Some(start_time) => {
                self.duration = Some((now_timestamp() - start_time).max(0.0));
            }
            None => {
                debug!(
                    result = %self.name,
                    "start_time is not set, duration is not updated"
                );
            }
        }
        self
    }

    pub fn set_timing(&mut self, stopwatch: &Stopwatch) -> &mut Self {
        self.start_time = Some(stopwatch.start_time());
        self.duration = Some(stopwatch.duration());
        self
    }

    pub fn find_result(&self, name: &str) -> Option<&ResultNode> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn find_result_mut(&mut self, name: &str) -> Option<&mut ResultNode> {
        self.results.iter_mut().find(|r| r.name == name)
    }

    /// Replace the sub-result with the same name, or append it if there is
    /// none, then recompute this node's status.
    ///
    /// With `drop_nested_results` the stored copy loses its own children,
    /// which keeps the workflow document at two levels.
    pub fn update_sub_result(&mut self, mut result: ResultNode, drop_nested_results: bool) -> &mut Self {
        if drop_nested_results {
            result.results.clear();
        }
        match self.results.iter().position(|r| r.name == result.name) {
            Some(index) => self.results[index] = result,
            None => self.results.push(result),
        }
        self.refresh_status()
    }

    /// Recompute the status of a node that has children.
    ///
    /// Leaves are left untouched. When the node leaves pending/running for a
    /// terminal status its duration is fixed here.
    pub fn refresh_status(&mut self) -> &mut Self {
        if self.results.is_empty() {
            return self;
        }

        let was_active = self.status.is_active();
        self.status = aggregate(&self.results);

        if was_active && self.status.is_completed() {
            info!(result = %self.name, status = %self.status, "Pipeline finished");
            self.update_duration();
        }
        self
    }

    /// [`refresh_status`](Self::refresh_status) on every node, leaves first
    pub fn refresh_status_recursive(&mut self) -> &mut Self {
        for result in &mut self.results {
            result.refresh_status_recursive();
        }
        self.refresh_status()
    }

    /// Append a short failure summary to the info of a finished job.
    ///
    /// `tests_result` names the sub-result that holds individual test cases;
    /// its info is copied up and its failing children are listed. Without it
    /// this node's own children are used. `rerun_command` is appended as a
    /// hint, with the first failing test when test cases are known.
    pub fn add_job_summary(&mut self, tests_result: Option<&str>, rerun_command: Option<&str>) -> &mut Self {
        let mut tests_info = None;
        let mut with_tests = false;
        let mut failed: Vec<String> = self
            .results
            .iter()
            .filter(|r| !r.is_ok())
            .map(|r| r.name.clone())
            .collect();

        if let Some(tests) = tests_result.and_then(|name| self.find_result(name)) {
            with_tests = true;
            if !tests.info.is_empty() {
                tests_info = Some(tests.info.clone());
            }
            failed = tests
                .results
                .iter()
                .filter(|r| !r.is_ok())
                .map(|r| r.name.clone())
                .collect();
        }

        if let Some(info) = tests_info {
            self.append_info(&info);
        }

        if self.is_ok() {
            return self;
        }

        if !failed.is_empty() && failed.len() < MAX_FAILED_NAMES_IN_SUMMARY {
            let line = format!("Failed: {}", failed.join(", "));
            self.append_info(&line);
        }

        if let Some(command) = rerun_command {
            let mut hint = format!("To run locally: {command}");
            if with_tests {
                if let Some(first) = failed.first() {
                    hint.push_str(&format!(" --test {first}"));
                }
            }
            self.append_info(&hint);
        }
        self
    }

    /// Indented tree of failed tasks, with the info of failed leaves.
    ///
    /// Empty when the result is ok.
    pub fn failure_report(&self) -> String {
        let mut report = String::new();
        self.write_failures("", &mut report);
        report
    }

    fn write_failures(&self, indent: &str, out: &mut String) {
        if self.is_ok() {
            return;
        }

        out.push_str(&format!("{indent}Task [{}] failed.\n", self.name));
        let sub_indent = format!("{indent}  ");

        if self.results.is_empty() {
            out.push_str(&format!("{sub_indent}{}:\n", self.name));
            for line in self.info.lines() {
                out.push_str(&format!("{sub_indent}{sub_indent}{line}\n"));
            }
            return;
        }

        for result in &self.results {
            result.write_failures(&sub_indent, out);
        }
    }

    /// Serialized document form
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
