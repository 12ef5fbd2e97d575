//! Task status values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a task or of a whole subtree of tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Registered, not started yet
    #[default]
    Pending,
    /// Stopwatch started
    Running,
    Success,
    Failure,
    Error,
    Skipped,
}

impl Status {
    /// Still waiting for an outcome
    pub fn is_active(self) -> bool {
        matches!(self, Status::Pending | Status::Running)
    }

    /// Reached one of the terminal states
    pub fn is_completed(self) -> bool {
        !self.is_active()
    }

    /// Success or skipped
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Success | Status::Skipped)
    }

    /// Failure or error
    pub fn is_failed(self) -> bool {
        matches!(self, Status::Failure | Status::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Error => "error",
            Status::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "running" => Ok(Status::Running),
            "success" => Ok(Status::Success),
            "failure" => Ok(Status::Failure),
            "error" => Ok(Status::Error),
            "skipped" => Ok(Status::Skipped),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}
