use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipeline_results::store::{ObjectStore, PutMode, PutOutcome, StoreError};
use pipeline_results::{
    FsObjectStore, MemoryObjectStore, ResultNode, Status, StorageUsage, SyncConfig, SyncError,
    WorkflowSync, WorkflowUpdate,
};
use tokio_test::{assert_err, assert_ok};

mod common;

use common::*;

const PREFIX: &str = "PRs/42/0a1b2c";

fn fast_config() -> SyncConfig {
    SyncConfig {
        max_attempts: 50,
        max_retry_delay: Duration::from_millis(20),
    }
}

fn sync_for(store: Arc<dyn ObjectStore>) -> WorkflowSync {
    WorkflowSync::new(store, PREFIX, "PR").with_config(fast_config())
}

/// Loses the create-if-absent race a fixed number of times
struct ContendedStore {
    inner: MemoryObjectStore,
    conflicts_left: AtomicU32,
    cas_attempts: AtomicU32,
}

impl ContendedStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            conflicts_left: AtomicU32::new(conflicts),
            cas_attempts: AtomicU32::new(0),
        }
    }

    fn cas_attempts(&self) -> u32 {
        self.cas_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for ContendedStore {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutOutcome, StoreError> {
        if mode == PutMode::CreateIfAbsent {
            self.cas_attempts.fetch_add(1, Ordering::SeqCst);
            let lost = self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Ok(PutOutcome::PreconditionFailed);
            }
        }
        self.inner.put(key, data, mode).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }
}

/// Listing fails a fixed number of times
struct UnavailableStore {
    inner: MemoryObjectStore,
    failures_left: AtomicU32,
}

#[async_trait]
impl ObjectStore for UnavailableStore {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutOutcome, StoreError> {
        self.inner.put(key, data, mode).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Backend("503 Slow Down".to_string()));
        }
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }
}

fn job(name: &str, status: Status) -> ResultNode {
    ResultNode::new(name, status)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_lose_no_update() {
    let store = Arc::new(MemoryObjectStore::new());

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let sync = sync_for(store.clone());
            tokio::spawn(async move {
                let update = WorkflowUpdate::new().sub_result(job(&format!("job_{i:02}"), Status::Success));
                sync.update(update).await
            })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    let sync = sync_for(store);
    let (version, document) = sync.fetch().await.unwrap();
    assert_eq!(version, 20);
    assert_eq!(document.results.len(), 20);

    let names: HashSet<&str> = document.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names.len(), 20);
    assert_eq!(document.status, Status::Success);
    assert_eq!(sync.latest().await.unwrap().unwrap().results.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_on_filesystem_store() {
    let dir = create_test_dir();
    let store = Arc::new(FsObjectStore::new(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let sync = sync_for(store.clone());
            tokio::spawn(async move {
                sync.update(WorkflowUpdate::new().sub_result(job(&format!("job_{i}"), Status::Failure)))
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    let (version, document) = sync_for(store).fetch().await.unwrap();
    assert_eq!(version, 8);
    assert_eq!(document.results.len(), 8);
    assert_eq!(document.status, Status::Failure);
}

#[tokio::test]
async fn test_lost_races_are_retried() {
    let store = Arc::new(ContendedStore::new(7));
    let sync = sync_for(store.clone());

    let transition = assert_ok!(sync.update(WorkflowUpdate::new().sub_result(job("Build", Status::Success))).await);

    assert_eq!(transition, Some(Status::Success));
    assert_eq!(store.cas_attempts(), 8);
    assert_eq!(sync.current_version().await.unwrap(), 1);
}

#[tokio::test]
async fn test_attempts_exhausted() {
    let store = Arc::new(ContendedStore::new(50));
    let sync = WorkflowSync::new(store.clone(), PREFIX, "PR").with_config(SyncConfig {
        max_attempts: 50,
        max_retry_delay: Duration::from_millis(1),
    });

    let err = assert_err!(sync.update(WorkflowUpdate::new().sub_result(job("Build", Status::Success))).await);

    match err {
        SyncError::AttemptsExhausted { workflow, attempts, .. } => {
            assert_eq!(workflow, "PR");
            assert_eq!(attempts, 50);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.cas_attempts(), 50);
    assert_eq!(sync.current_version().await.unwrap(), 0);

    // the last computed document is still readable
    let latest = sync.latest().await.unwrap().unwrap();
    assert_eq!(latest.results[0].name, "Build");
}

#[tokio::test]
async fn test_store_errors_share_the_attempt_budget() {
    let store = Arc::new(UnavailableStore {
        inner: MemoryObjectStore::new(),
        failures_left: AtomicU32::new(3),
    });
    let sync = sync_for(store.clone());

    assert_ok!(sync.apply(|doc| {
        doc.append_info("hello");
    })
    .await);
    assert_eq!(sync.fetch().await.unwrap().1.info, "hello");

    let store = Arc::new(UnavailableStore {
        inner: MemoryObjectStore::new(),
        failures_left: AtomicU32::new(u32::MAX),
    });
    let sync = WorkflowSync::new(store, PREFIX, "PR").with_config(SyncConfig {
        max_attempts: 3,
        max_retry_delay: Duration::ZERO,
    });
    let err = sync
        .apply(|doc| {
            doc.append_info("never");
        })
        .await
        .unwrap_err();
    match err {
        SyncError::AttemptsExhausted { last_error, .. } => {
            assert!(last_error.unwrap().contains("503"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_identical_update_still_advances_version() {
    let store = Arc::new(MemoryObjectStore::new());
    let sync = sync_for(store);
    let update = WorkflowUpdate::new().sub_result(job("Build", Status::Success));

    sync.update(update.clone()).await.unwrap();
    let (_, first) = sync.fetch().await.unwrap();
    sync.update(update).await.unwrap();
    let (version, second) = sync.fetch().await.unwrap();

    assert_eq!(version, 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_transition_reported_once() {
    let store = Arc::new(MemoryObjectStore::new());
    let sync = sync_for(store.clone());

    let mut document = ResultNode::pending("PR");
    document.start();
    document.results = vec![ResultNode::pending("Build"), ResultNode::pending("Test")];
    document.refresh_status();
    sync.reset(&document).await.unwrap();

    let running = sync
        .update(WorkflowUpdate::new().sub_result(job("Build", Status::Running)))
        .await
        .unwrap();
    assert_eq!(running, Some(Status::Running));
    let still_running = sync
        .update(WorkflowUpdate::new().sub_result(job("Test", Status::Running)))
        .await
        .unwrap();
    assert_eq!(still_running, None);

    let handles: Vec<_> = [("Build", Status::Success), ("Test", Status::Error)]
        .into_iter()
        .map(|(name, status)| {
            let sync = sync_for(store.clone());
            tokio::spawn(async move { sync.update(WorkflowUpdate::new().sub_result(job(name, status))).await })
        })
        .collect();

    let mut transitions = Vec::new();
    for handle in handles {
        if let Some(status) = handle.await.unwrap().unwrap() {
            transitions.push(status);
        }
    }

    assert_eq!(transitions, vec![Status::Failure]);
    let (version, document) = sync.fetch().await.unwrap();
    assert_eq!(version, 5);
    assert_eq!(document.status, Status::Failure);
    assert!(document.duration.is_some());
}

#[tokio::test]
async fn test_reset_opens_new_window() {
    let store = Arc::new(MemoryObjectStore::new());
    let sync = sync_for(store.clone());

    for name in ["a", "b", "c"] {
        sync.update(WorkflowUpdate::new().sub_result(job(name, Status::Success)))
            .await
            .unwrap();
    }
    assert_eq!(sync.current_version().await.unwrap(), 3);

    sync.reset(&ResultNode::pending("PR")).await.unwrap();

    assert_eq!(
        store.keys(),
        vec![
            format!("{PREFIX}/result_pr.json"),
            format!("{PREFIX}/result_pr.json_001"),
        ]
    );
    let (version, document) = sync.fetch().await.unwrap();
    assert_eq!(version, 1);
    assert!(document.results.is_empty());
}

#[tokio::test]
async fn test_first_version_clears_leftovers() {
    let store = Arc::new(MemoryObjectStore::new());
    store
        .put(&format!("{PREFIX}/result_pr.json_stale"), Bytes::from("x"), PutMode::Overwrite)
        .await
        .unwrap();
    store
        .put(&format!("{PREFIX}/result_other.json_001"), Bytes::from("x"), PutMode::Overwrite)
        .await
        .unwrap();

    let sync = sync_for(store.clone());
    sync.update(WorkflowUpdate::new().info("started")).await.unwrap();

    let keys = store.keys();
    assert!(!keys.contains(&format!("{PREFIX}/result_pr.json_stale")));
    assert!(keys.contains(&format!("{PREFIX}/result_other.json_001")));
    assert!(keys.contains(&format!("{PREFIX}/result_pr.json_001")));
}

#[tokio::test]
async fn test_storage_usage_accumulates() {
    let store = Arc::new(MemoryObjectStore::new());
    let sync = sync_for(store);

    for (job_name, key) in [("Build", "build.log"), ("Test", "test.log")] {
        let mut usage = StorageUsage::new();
        usage.record_upload(key, 100);
        sync.update(
            WorkflowUpdate::new()
                .sub_result(job(job_name, Status::Success))
                .storage_usage(usage),
        )
        .await
        .unwrap();
    }

    let (_, document) = sync.fetch().await.unwrap();
    let usage = StorageUsage::from_result(&document);
    assert_eq!(usage.uploaded_bytes, 200);
    assert_eq!(usage.uploaded_files, 2);
    assert_eq!(usage.uploaded_details.len(), 2);
}
