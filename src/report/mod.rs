//! External test report translation
//!
//! Converts structured reports produced by test runners into result
//! subtrees. Translation never fails outright: malformed input becomes an
//! `error` result that explains what went wrong.

pub mod gtest;

pub use gtest::{translate, translate_file, ReportError, PARSING_ERROR_RESULT};

use crate::result::{ResultNode, Status};

/// Outcome of translating one report
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// Overall status of the test run
    pub status: Status,
    /// One result per test case, followed by a result for the whole run
    pub results: Vec<ResultNode>,
    /// Short human readable description
    pub summary: String,
}

impl Translation {
    /// Store the translation on the result of the task that ran the tests
    pub fn apply_to(self, result: &mut ResultNode) {
        result.set_status(self.status);
        result.results = self.results;
        result.append_info(&self.summary);
    }

    /// Standalone result named `name`
    pub fn into_result(self, name: impl Into<String>) -> ResultNode {
        let mut result = ResultNode::pending(name);
        self.apply_to(&mut result);
        result
    }
}
