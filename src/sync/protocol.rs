//! Optimistic-concurrency updates of the shared workflow document
//!
//! The workflow document lives in the object store as a series of immutable
//! snapshots, one per version:
//!
//! ```text
//! <prefix>/result_<workflow>.json_001
//! <prefix>/result_<workflow>.json_002
//! ...
//! <prefix>/result_<workflow>.json        latest accepted content, best effort
//! ```
//!
//! An update lists the snapshots, reads the highest version, applies a merge
//! in memory and writes `version + 1` with create-if-absent. Exactly one
//! writer can create a given version; the others re-read and re-apply their
//! merge on top of the winner's document. The listing is the source of truth,
//! the unversioned pointer is only a convenience for readers.

use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::update::WorkflowUpdate;
use crate::result::{ResultNode, Status};
use crate::store::{ObjectStore, PutMode, PutOutcome, ResultStore, StoreError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to update workflow result [{workflow}] after {attempts} attempts")]
    AttemptsExhausted {
        workflow: String,
        attempts: u32,
        /// Last store failure seen, if the attempts were not all lost races
        last_error: Option<String>,
    },

    #[error("Malformed workflow result at {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Workflow result [{0}] was created by another writer during reset")]
    ResetConflict(String),

    #[error("Workflow update carries no changes")]
    EmptyUpdate,
}

/// Retry budget of the update loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    /// Attempts per update, lost races and store failures alike
    pub max_attempts: u32,
    /// Upper bound (exclusive) of the random pause before a retry
    pub max_retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }
}

/// Handle on one workflow's shared result document
pub struct WorkflowSync {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    workflow: String,
    config: SyncConfig,
}

impl WorkflowSync {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            workflow: workflow.into(),
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Key of the unversioned copy of the latest accepted document
    pub fn pointer_key(&self) -> String {
        let file_name = ResultStore::file_name_for(&self.workflow);
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            file_name
        } else {
            format!("{prefix}/{file_name}")
        }
    }

    pub fn snapshot_key(&self, version: u64) -> String {
        format!("{}_{:03}", self.pointer_key(), version)
    }

    fn parse_version(&self, key: &str) -> Option<u64> {
        key.strip_prefix(&self.pointer_key())?
            .strip_prefix('_')?
            .parse()
            .ok()
    }

    /// Highest snapshot version in the store, 0 when there is none
    pub async fn current_version(&self) -> Result<u64, StoreError> {
        let prefix = format!("{}_", self.pointer_key());
        let keys = self.store.list(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|key| self.parse_version(key))
            .max()
            .unwrap_or(0))
    }

    /// Latest snapshot and its version.
    ///
    /// Without any snapshot the document is a fresh pending result named
    /// after the workflow, at version 0.
    pub async fn fetch(&self) -> Result<(u64, ResultNode), SyncError> {
        let version = self.current_version().await?;
        if version == 0 {
            return Ok((0, ResultNode::pending(self.workflow.clone())));
        }

        let key = self.snapshot_key(version);
        let bytes = self.store.get(&key).await?;
        let document = ResultNode::from_json(&bytes).map_err(|source| SyncError::Malformed { key, source })?;
        Ok((version, document))
    }

    /// Read the unversioned copy, if any. It may lag behind the snapshots.
    pub async fn latest(&self) -> Result<Option<ResultNode>, SyncError> {
        let key = self.pointer_key();
        match self.store.get(&key).await {
            Ok(bytes) => ResultNode::from_json(&bytes)
                .map(Some)
                .map_err(|source| SyncError::Malformed { key, source }),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `merge` to the shared document.
    ///
    /// `merge` may run several times, each time on a freshly fetched
    /// document, so it must only depend on its argument. Statuses are
    /// recomputed bottom-up after every merge.
    ///
    /// Returns the new workflow status when the accepted write changed it,
    /// `None` otherwise. Only the writer whose version was accepted sees the
    /// transition, so a status change is reported once.
    #[instrument(skip(self, merge), fields(workflow = %self.workflow))]
    pub async fn apply<F>(&self, merge: F) -> Result<Option<Status>, SyncError>
    where
        F: Fn(&mut ResultNode) + Send + Sync,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error: Option<StoreError> = None;
        let mut last_payload: Option<Bytes> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry_delay();
                debug!(attempt, ?delay, "Retrying workflow result update");
                tokio::time::sleep(delay).await;
            }

            let (version, mut document) = match self.fetch().await {
                Ok(snapshot) => snapshot,
                Err(SyncError::Store(e)) => {
                    warn!(attempt, error = %e, "Failed to fetch workflow result");
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let previous = document.status;
            merge(&mut document);
            document.refresh_status_recursive();

            let next = version + 1;
            let payload = Bytes::from(document.to_json()?);

            match self.write_snapshot(next, payload.clone()).await {
                Ok(PutOutcome::Written) => {
                    self.write_pointer(payload).await;
                    info!(
                        version = next,
                        attempt,
                        status = %document.status,
                        "Workflow result updated"
                    );
                    return Ok((document.status != previous).then_some(document.status));
                }
                Ok(PutOutcome::PreconditionFailed) => {
                    info!(version = next, attempt, "Workflow result version taken by another writer");
                }
                Err(e) => {
                    warn!(version = next, attempt, error = %e, "Failed to put versioned workflow result");
                    last_error = Some(e);
                }
            }
            last_payload = Some(payload);
        }

        if let Some(payload) = last_payload {
            warn!(
                attempts = max_attempts,
                "Attempts exhausted, writing best-effort workflow result"
            );
            self.write_pointer(payload).await;
        }

        Err(SyncError::AttemptsExhausted {
            workflow: self.workflow.clone(),
            attempts: max_attempts,
            last_error: last_error.map(|e| e.to_string()),
        })
    }

    /// Apply a canned [`WorkflowUpdate`]
    pub async fn update(&self, update: WorkflowUpdate) -> Result<Option<Status>, SyncError> {
        if update.is_empty() {
            return Err(SyncError::EmptyUpdate);
        }
        self.apply(|document| update.merge_into(document)).await
    }

    /// Open a new contention window: remove every object of this document
    /// (snapshots of earlier windows and the pointer) and store `document`
    /// as version 1.
    ///
    /// Meant for the single writer that starts a workflow run, before any
    /// worker calls [`apply`](Self::apply).
    pub async fn reset(&self, document: &ResultNode) -> Result<(), SyncError> {
        let removed = self.store.delete_prefix(&self.pointer_key()).await?;
        let payload = Bytes::from(document.to_json()?);

        match self
            .store
            .put(&self.snapshot_key(1), payload.clone(), PutMode::CreateIfAbsent)
            .await?
        {
            PutOutcome::Written => {
                self.write_pointer(payload).await;
                info!(workflow = %self.workflow, removed, "Workflow result reset");
                Ok(())
            }
            PutOutcome::PreconditionFailed => Err(SyncError::ResetConflict(self.workflow.clone())),
        }
    }

    async fn write_snapshot(&self, version: u64, payload: Bytes) -> Result<PutOutcome, StoreError> {
        if version == 1 {
            self.clear_history().await?;
        }
        self.store
            .put(&self.snapshot_key(version), payload, PutMode::CreateIfAbsent)
            .await
    }

    /// Drop leftovers that match the document's file name before version 1
    /// is written. Snapshots are never removed here: once one exists another
    /// writer has opened the window and its history must survive.
    async fn clear_history(&self) -> Result<(), StoreError> {
        let keys = self.store.list(&self.pointer_key()).await?;
        if keys.iter().any(|key| self.parse_version(key).is_some()) {
            debug!("Snapshots present, keeping history");
            return Ok(());
        }
        for key in &keys {
            self.store.delete(key).await?;
        }
        Ok(())
    }

    async fn write_pointer(&self, payload: Bytes) {
        if let Err(e) = self
            .store
            .put(&self.pointer_key(), payload, PutMode::Overwrite)
            .await
        {
            warn!(error = %e, "Failed to put non-versioned workflow result");
        }
    }

    fn retry_delay(&self) -> Duration {
        let max = self.config.max_retry_delay;
        if max.is_zero() {
            return Duration::ZERO;
        }
        max.mul_f64(rand::thread_rng().gen::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    fn sync_for(store: Arc<MemoryObjectStore>) -> WorkflowSync {
        WorkflowSync::new(store, "PRs/123/abc", "PR").with_config(SyncConfig {
            max_attempts: 5,
            max_retry_delay: Duration::from_millis(5),
        })
    }

    #[test]
    fn test_keys() {
        let sync = sync_for(Arc::new(MemoryObjectStore::new()));
        assert_eq!(sync.pointer_key(), "PRs/123/abc/result_pr.json");
        assert_eq!(sync.snapshot_key(7), "PRs/123/abc/result_pr.json_007");
        assert_eq!(sync.snapshot_key(1234), "PRs/123/abc/result_pr.json_1234");
        assert_eq!(sync.parse_version("PRs/123/abc/result_pr.json_012"), Some(12));
        assert_eq!(sync.parse_version("PRs/123/abc/result_pr.json"), None);
        assert_eq!(sync.parse_version("PRs/123/abc/result_pr.json_x"), None);
    }

    #[test]
    fn test_retry_delay_bounds() {
        let sync = sync_for(Arc::new(MemoryObjectStore::new()));
        for _ in 0..100 {
            assert!(sync.retry_delay() < Duration::from_millis(5));
        }
    }

    #[tokio::test]
    async fn test_fetch_empty_store() {
        let sync = sync_for(Arc::new(MemoryObjectStore::new()));
        let (version, document) = sync.fetch().await.unwrap();
        assert_eq!(version, 0);
        assert_eq!(document, ResultNode::pending("PR"));
        assert!(sync.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_writes_snapshot_and_pointer() {
        let store = Arc::new(MemoryObjectStore::new());
        let sync = sync_for(store.clone());

        let transition = sync
            .apply(|doc| {
                doc.update_sub_result(ResultNode::new("Build", Status::Success), true);
            })
            .await
            .unwrap();

        assert_eq!(transition, Some(Status::Success));
        assert_eq!(sync.current_version().await.unwrap(), 1);
        assert_eq!(
            store.keys(),
            vec!["PRs/123/abc/result_pr.json", "PRs/123/abc/result_pr.json_001"]
        );
        let latest = sync.latest().await.unwrap().unwrap();
        assert_eq!(latest, sync.fetch().await.unwrap().1);
    }

    #[tokio::test]
    async fn test_no_transition_reported_when_status_unchanged() {
        let sync = sync_for(Arc::new(MemoryObjectStore::new()));
        let transition = sync.apply(|doc| {
            doc.append_info("queued");
        });
        assert_eq!(transition.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_update_rejected() {
        let sync = sync_for(Arc::new(MemoryObjectStore::new()));
        let err = sync.update(WorkflowUpdate::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::EmptyUpdate));
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_not_retried() {
        let store = Arc::new(MemoryObjectStore::new());
        let sync = sync_for(store.clone());
        store
            .put(&sync.snapshot_key(1), Bytes::from("garbage"), PutMode::Overwrite)
            .await
            .unwrap();

        let err = sync.apply(|doc| {
            doc.append_info("x");
        });
        assert!(matches!(err.await, Err(SyncError::Malformed { .. })));
    }
}
