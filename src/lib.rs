//! # Pipeline Results
//!
//! Hierarchical CI result documents, merged by many independent workers into
//! one versioned workflow document over a plain object store.
//!
//! ## Features
//!
//! - **Result trees** - One [`ResultNode`] per task, nested jobs and test cases
//! - **Status rollup** - Parent status derived from its children
//! - **Report translation** - gtest JSON reports become result subtrees
//! - **Lock-free merging** - Optimistic, versioned updates with create-if-absent writes
//! - **Artifact publishing** - Local files uploaded once and replaced with links
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pipeline_results::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(FsObjectStore::new("./ci/store"));
//!
//!     let mut job = CommandTask::new("Unit tests", ["cargo test"]).run().await?;
//!     let usage = ArtifactPublisher::new(store.clone(), "PRs/1234").publish(&mut job).await?;
//!
//!     let sync = WorkflowSync::new(store, "PRs/1234", "PR");
//!     let update = WorkflowUpdate::new().sub_result(job).storage_usage(usage);
//!     if let Some(status) = sync.update(update).await? {
//!         println!("Workflow is now {status}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod naming;
pub mod publish;
pub mod report;
pub mod result;
pub mod store;
pub mod sync;
pub mod task;

// Re-export main types
pub use config::{ConfigError, Settings};
pub use publish::{ArtifactPublisher, PublishError};
pub use report::{ReportError, Translation};
pub use result::{aggregate, ResultError, ResultNode, Status, Stopwatch, StorageUsage};
pub use store::{
    FsObjectStore, MemoryObjectStore, ObjectStore, PutMode, PutOutcome, ResultStore, StoreError,
};
pub use sync::{SyncConfig, SyncError, WorkflowSync, WorkflowUpdate};
pub use task::{CommandTask, TaskError, TaskProducer};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::publish::ArtifactPublisher;
    pub use crate::result::{ResultNode, Status, Stopwatch};
    pub use crate::store::{FsObjectStore, MemoryObjectStore, ObjectStore, ResultStore};
    pub use crate::sync::{SyncConfig, WorkflowSync, WorkflowUpdate};
    pub use crate::task::{CommandTask, TaskProducer};
}
