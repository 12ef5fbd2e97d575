//! Storage for result documents and artifacts
//!
//! - `local` - [`ResultStore`], result documents on the worker's disk
//! - [`ObjectStore`] - the shared, eventually-consistent object store that
//!   workers coordinate through
//! - `memory` - In-memory object store
//! - `fs` - Object store backed by a local directory
//!
//! The object store contract is deliberately small: read, write (optionally
//! only if the key is absent), list by prefix and delete. Create-if-absent is
//! the only coordination primitive the update protocol relies on.

use async_trait::async_trait;
use bytes::Bytes;

pub mod fs;
pub mod local;
pub mod memory;

pub use fs::FsObjectStore;
pub use local::ResultStore;
pub use memory::MemoryObjectStore;

/// Errors returned by object store backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Write mode for [`ObjectStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Replace any existing object
    Overwrite,
    /// Fail with [`PutOutcome::PreconditionFailed`] if the key exists
    CreateIfAbsent,
}

/// Outcome of a write that reached the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// The key already existed; nothing was written. This is a normal
    /// result, not an error.
    PreconditionFailed,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object. Returns [`StoreError::NotFound`] if it does not exist.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutOutcome, StoreError>;

    /// Keys starting with `prefix`, in no particular order
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete one object; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every object under `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }

    /// Durable link to an object, as shown to users
    fn url(&self, key: &str) -> String;
}
