//! gtest JSON report translation
//!
//! Reads the report written by `--gtest_output=json:<file>`:
//!
//! ```json
//! {
//!   "tests": 3, "failures": 1, "errors": 0, "time": "0.42s", "name": "AllTests",
//!   "testsuites": [
//!     { "name": "Suite", "testsuite": [
//!       { "name": "Case", "status": "RUN", "time": "0.01s",
//!         "failures": [ { "failure": "Expected equality ...", "type": "" } ] }
//!     ] }
//!   ]
//! }
//! ```

use serde::Deserialize;
use std::path::Path;
use tracing::{error, warn};

use super::Translation;
use crate::result::{ResultNode, Status};

const SEGFAULT: &str = "Segmentation fault. ";
const SIGNAL: &str = "Exit on signal. ";

/// Fatal-signal markers: text searched in failure output, and the note added
/// to the summary (once) when it is found
const FATAL_MARKERS: [(&str, &str); 2] = [
    ("Segmentation fault", SEGFAULT),
    ("received signal SIG", SIGNAL),
];

pub const PARSING_ERROR_RESULT: &str = "Parsing Error";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),
}

#[derive(Debug, Deserialize)]
struct GtestReport {
    tests: u64,
    failures: u64,
    #[serde(default)]
    errors: u64,
    time: String,
    name: String,
    #[serde(default)]
    testsuites: Vec<GtestSuite>,
}

#[derive(Debug, Deserialize)]
struct GtestSuite {
    name: String,
    #[serde(default)]
    testsuite: Vec<GtestCase>,
}

#[derive(Debug, Deserialize)]
struct GtestCase {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    failures: Option<Vec<GtestFailure>>,
}

#[derive(Debug, Deserialize)]
struct GtestFailure {
    #[serde(default)]
    failure: String,
}

/// Translate a gtest JSON report.
///
/// Malformed input never fails the call: it yields an `error` translation
/// holding one `"Parsing Error"` result with the parser message.
pub fn translate(report: &[u8]) -> Translation {
    match try_translate(report) {
        Ok(translation) => translation,
        Err(e) => {
            error!(error = %e, "Failed to read test report json");
            Translation {
                status: Status::Error,
                results: vec![ResultNode::new(PARSING_ERROR_RESULT, Status::Error).with_info(&e.to_string())],
                summary: "ERROR: failed to read test report json".to_string(),
            }
        }
    }
}

/// Translate the report stored at `path`.
///
/// A missing file is an `error` translation with a single parsing error
/// result naming the file. When the file exists but cannot be parsed, it is
/// attached to the parsing error result.
pub fn translate_file(path: impl AsRef<Path>) -> Translation {
    let path = path.as_ref();
    if !path.is_file() {
        error!(path = %path.display(), "No test result file");
        let message = format!("No test result file [{}]", path.display());
        return Translation {
            status: Status::Error,
            results: vec![ResultNode::new(PARSING_ERROR_RESULT, Status::Error).with_info(&message)],
            summary: message,
        };
    }

    let mut translation = match std::fs::read(path) {
        Ok(bytes) => translate(&bytes),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read test result file");
            Translation {
                status: Status::Error,
                results: vec![ResultNode::new(PARSING_ERROR_RESULT, Status::Error).with_info(&e.to_string())],
                summary: "ERROR: failed to read test report json".to_string(),
            }
        }
    };

    if translation.status == Status::Error {
        if let Some(parsing) = translation
            .results
            .iter_mut()
            .find(|r| r.name == PARSING_ERROR_RESULT)
        {
            if let Err(e) = parsing.attach_files([path]) {
                warn!(error = %e, "Report file vanished before it could be attached");
            }
        }
    }
    translation
}

fn try_translate(report: &[u8]) -> Result<Translation, ReportError> {
    let report: GtestReport = serde_json::from_slice(report)?;

    let mut results = Vec::new();
    let mut summary = String::new();

    for suite in &report.testsuites {
        for case in &suite.testsuite {
            let duration = case.time.as_deref().map(parse_seconds).transpose()?;

            let raw_logs = case
                .failures
                .as_ref()
                .map(|failures| failures.iter().map(|f| f.failure.as_str()).collect::<String>());

            if let Some(logs) = &raw_logs {
                for (marker, note) in FATAL_MARKERS {
                    if logs.contains(marker) && !summary.contains(note) {
                        summary.push_str(note);
                    }
                }
            }

            let status = if case.status == "NOTRUN" {
                Status::Skipped
            } else if raw_logs.is_some() {
                Status::Failure
            } else {
                Status::Success
            };

            let mut node = ResultNode::new(format!("{}.{}", suite.name, case.name), status);
            node.duration = duration;
            node.info = raw_logs.unwrap_or_default();
            results.push(node);
        }
    }

    let status = if report.errors > 0 {
        Status::Error
    } else if report.failures > 0 {
        Status::Failure
    } else {
        Status::Success
    };

    let mut total = ResultNode::new(report.name.clone(), status);
    total.duration = Some(parse_seconds(&report.time)?);
    results.push(total);

    if summary.is_empty() {
        let failed = report.failures + report.errors;
        summary = format!(
            "fail: {}, passed: {}",
            failed,
            report.tests.saturating_sub(failed)
        );
    }

    Ok(Translation {
        status,
        results,
        summary,
    })
}

/// gtest durations look like `"0.125s"`; only finite, non-negative values
/// are accepted
fn parse_seconds(value: &str) -> Result<f64, ReportError> {
    let trimmed = value.trim();
    let seconds = trimmed
        .strip_suffix('s')
        .unwrap_or(trimmed)
        .parse::<f64>()
        .map_err(|_| ReportError::InvalidDuration(value.to_string()))?;

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ReportError::InvalidDuration(value.to_string()));
    }
    Ok(seconds)
}
