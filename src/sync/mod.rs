//! Many workers, one workflow document
//!
//! Workers running the jobs of a workflow each contribute their job result to
//! a single shared document. There is no lock service: coordination relies
//! only on the object store's create-if-absent write (see [`protocol`]).

pub mod protocol;
pub mod update;

pub use protocol::{SyncConfig, SyncError, WorkflowSync, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RETRY_DELAY};
pub use update::WorkflowUpdate;
