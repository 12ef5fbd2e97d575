//! Storage usage counters kept in a result's `ext` map

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::node::ResultNode;

/// Object store traffic caused by a run.
///
/// Merging sums every counter, so updates from different workers accumulate
/// instead of replacing each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    #[serde(default)]
    pub uploaded_bytes: u64,
    #[serde(default)]
    pub uploaded_files: u64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    /// Bytes uploaded per object key
    #[serde(default)]
    pub uploaded_details: BTreeMap<String, u64>,
}

impl StorageUsage {
    /// Key of the usage entry in [`ResultNode::ext`]
    pub const EXT_KEY: &'static str = "storage_usage";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn record_upload(&mut self, key: &str, bytes: u64) {
        self.uploaded_bytes += bytes;
        self.uploaded_files += 1;
        *self.uploaded_details.entry(key.to_string()).or_insert(0) += bytes;
    }

    pub fn record_download(&mut self, bytes: u64) {
        self.downloaded_bytes += bytes;
    }

    pub fn merge_with(&mut self, other: &StorageUsage) -> &mut Self {
        self.uploaded_bytes += other.uploaded_bytes;
        self.uploaded_files += other.uploaded_files;
        self.downloaded_bytes += other.downloaded_bytes;
        for (key, bytes) in &other.uploaded_details {
            *self.uploaded_details.entry(key.clone()).or_insert(0) += bytes;
        }
        self
    }

    /// Read the usage stored on a result; an absent or unreadable entry
    /// counts as empty.
    pub fn from_result(result: &ResultNode) -> Self {
        match result.ext.get(Self::EXT_KEY) {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(result = %result.name, error = %e, "Ignoring malformed storage usage");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Add this usage to whatever the result already carries
    pub fn merge_into(&self, result: &mut ResultNode) {
        let mut total = Self::from_result(result);
        total.merge_with(self);
        match serde_json::to_value(&total) {
            Ok(value) => {
                result.set_ext(Self::EXT_KEY, value);
            }
            Err(e) => warn!(result = %result.name, error = %e, "Failed to store storage usage"),
        }
    }
}
