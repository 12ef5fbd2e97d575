//! Canned merges for the workflow document

use crate::result::{ResultNode, StorageUsage};

/// Changes a worker contributes to the shared workflow document.
///
/// Applying an update is order-insensitive as long as workers touch distinct
/// sub-results: sub-results are replaced by name, info is appended and
/// storage usage counters are summed.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub info: Option<String>,
    pub sub_results: Vec<ResultNode>,
    /// Store sub-results without their own children
    pub drop_nested_results: bool,
    pub storage_usage: Option<StorageUsage>,
}

impl WorkflowUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace or append a job result, keeping only its top level
    pub fn sub_result(mut self, result: ResultNode) -> Self {
        self.sub_results.push(result);
        self.drop_nested_results = true;
        self
    }

    /// Replace or append a result together with its children
    pub fn sub_result_with_nested(mut self, result: ResultNode) -> Self {
        self.sub_results.push(result);
        self.drop_nested_results = false;
        self
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn storage_usage(mut self, usage: StorageUsage) -> Self {
        self.storage_usage = Some(usage);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.info.as_deref().map_or(true, str::is_empty)
            && self.sub_results.is_empty()
            && self.storage_usage.as_ref().map_or(true, StorageUsage::is_empty)
    }

    /// Apply the update to a fetched copy of the workflow document
    pub fn merge_into(&self, workflow: &mut ResultNode) {
        if let Some(info) = self.info.as_deref().filter(|i| !i.is_empty()) {
            workflow.append_info(info);
        }
        for result in &self.sub_results {
            workflow.update_sub_result(result.clone(), self.drop_nested_results);
        }
        if let Some(usage) = &self.storage_usage {
            usage.merge_into(workflow);
        }
    }
}
