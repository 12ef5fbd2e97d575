//! Object store backed by a local directory
//!
//! Keys map to paths under the root (`a/b/c.json` → `<root>/a/b/c.json`).
//! Objects are staged in `<root>/.staging` and then published with a hard
//! link (create-if-absent) or a rename (overwrite), so readers never see a
//! partially written object and two writers racing for the same key get
//! exactly one winner.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::{ObjectStore, PutMode, PutOutcome, StoreError};

const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && !key.starts_with(STAGING_DIR);
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn stage(&self, key: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        let staging = self.root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| io_error(key, e))?;
        let staged = staging.join(format!("{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&staged, data)
            .await
            .map_err(|e| io_error(key, e))?;
        Ok(staged)
    }
}

fn io_error(key: &str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutOutcome, StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }

        let staged = self.stage(key, &data).await?;

        let outcome = match mode {
            PutMode::Overwrite => tokio::fs::rename(&staged, &path)
                .await
                .map(|_| PutOutcome::Written)
                .map_err(|e| io_error(key, e)),
            PutMode::CreateIfAbsent => match tokio::fs::hard_link(&staged, &path).await {
                Ok(()) => Ok(PutOutcome::Written),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(key, "Object already exists");
                    Ok(PutOutcome::PreconditionFailed)
                }
                Err(e) => Err(io_error(key, e)),
            },
        };

        // a hard link leaves the staged copy behind
        if mode == PutMode::CreateIfAbsent || outcome.is_err() {
            let _ = tokio::fs::remove_file(&staged).await;
        }
        outcome
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(prefix, e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(prefix, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| io_error(prefix, e))?;

                if file_type.is_dir() {
                    if path != self.root.join(STAGING_DIR) {
                        pending.push(path);
                    }
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get_nested_key() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put("runs/42/result.json", Bytes::from("{}"), PutMode::Overwrite)
            .await
            .unwrap();

        assert_eq!(store.get("runs/42/result.json").await.unwrap(), Bytes::from("{}"));
        assert!(dir.path().join("runs/42/result.json").is_file());
    }

    #[tokio::test]
    async fn test_create_if_absent() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let first = store
            .put("k.json_001", Bytes::from("a"), PutMode::CreateIfAbsent)
            .await
            .unwrap();
        let second = store
            .put("k.json_001", Bytes::from("b"), PutMode::CreateIfAbsent)
            .await
            .unwrap();

        assert_eq!(first, PutOutcome::Written);
        assert_eq!(second, PutOutcome::PreconditionFailed);
        assert_eq!(store.get("k.json_001").await.unwrap(), Bytes::from("a"));
    }

    #[tokio::test]
    async fn test_list_skips_staging_and_filters_prefix() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        for key in ["wf/result_a.json", "wf/result_a.json_001", "logs/x.log"] {
            store.put(key, Bytes::from("x"), PutMode::Overwrite).await.unwrap();
        }

        let mut keys = store.list("wf/result_a.json").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["wf/result_a.json", "wf/result_a.json_001"]);

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("not-created"));
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.get("../secret").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert!(matches!(store.get("/etc/passwd").await, Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.delete("nothing/here").await.unwrap();
    }
}
