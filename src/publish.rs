//! Artifact publishing
//!
//! Uploads the local files attached to a result tree and replaces them with
//! durable links. Objects are keyed by the path of normalized result names
//! leading to the node that owns the file:
//!
//! ```text
//! <prefix>/<workflow>/<job>/<file name>
//! ```

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::naming::normalize;
use crate::result::{ResultNode, StorageUsage};
use crate::store::{ObjectStore, PutMode, StoreError};

/// Scheme of the placeholder link left for a file that could not be read
pub const MISSING_LINK_PREFIX: &str = "missing://";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

/// Per-call state shared by the whole tree walk
#[derive(Default)]
struct PublishRun {
    /// Local path to the link it was published under
    links: HashMap<PathBuf, String>,
    /// Object keys written so far
    keys: HashSet<String>,
    usage: StorageUsage,
}

enum Upload {
    Published(String),
    Unreadable(std::io::Error),
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Publish every file in the tree, depth-first.
    ///
    /// A path referenced from several nodes is uploaded once and every node
    /// gets the same link. A file that cannot be read any more gets a
    /// `missing://` placeholder and a warning in the node's info; the rest of
    /// the tree is still published. Returns the traffic caused by this call.
    ///
    /// Only store failures abort the walk. Files not handled yet stay in
    /// their node's `files`, so the call can be repeated.
    pub async fn publish(&self, result: &mut ResultNode) -> Result<StorageUsage, PublishError> {
        let mut run = PublishRun::default();
        self.publish_node(result, self.prefix.clone(), &mut run).await?;

        if !run.usage.is_empty() {
            info!(
                result = %result.name,
                files = run.usage.uploaded_files,
                bytes = run.usage.uploaded_bytes,
                "Artifacts published"
            );
        }
        Ok(run.usage)
    }

    fn publish_node<'a>(
        &'a self,
        node: &'a mut ResultNode,
        parent: String,
        run: &'a mut PublishRun,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        async move {
            let key_prefix = join_key(&parent, &normalize(&node.name));

            let files = node.files.clone();
            for (index, file) in files.iter().enumerate() {
                if let Some(link) = run.links.get(file) {
                    debug!(file = %file.display(), "Reusing published link");
                    node.add_link(link.clone());
                    continue;
                }

                match self.upload(file, &key_prefix, run).await {
                    Ok(Upload::Published(link)) => {
                        run.links.insert(file.clone(), link.clone());
                        node.add_link(link);
                    }
                    Ok(Upload::Unreadable(e)) => {
                        warn!(result = %node.name, file = %file.display(), error = %e, "File was not found, skipping upload");
                        node.add_link(format!("{MISSING_LINK_PREFIX}{}", file.display()));
                        node.append_info(&format!("WARNING: File [{}] was not found", file.display()));
                    }
                    Err(e) => {
                        node.files.drain(..index);
                        return Err(e);
                    }
                }
            }
            node.files.clear();

            for child in &mut node.results {
                self.publish_node(child, key_prefix.clone(), run).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn upload(&self, file: &Path, key_prefix: &str, run: &mut PublishRun) -> Result<Upload, PublishError> {
        let data = match tokio::fs::read(file).await {
            Ok(data) => data,
            Err(e) => return Ok(Upload::Unreadable(e)),
        };

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let key = unique_key(key_prefix, &file_name, &run.keys);
        if key != join_key(key_prefix, &file_name) {
            warn!(file = %file.display(), key = %key, "Artifact name already taken, using a suffixed key");
        }
        let size = data.len() as u64;

        self.store
            .put(&key, Bytes::from(data), PutMode::Overwrite)
            .await?;
        run.keys.insert(key.clone());
        run.usage.record_upload(&key, size);
        debug!(file = %file.display(), key = %key, size, "Uploaded artifact");

        Ok(Upload::Published(self.store.url(&key)))
    }
}

/// `<prefix>/<file name>`, or `<prefix>/<stem>_<n>.<ext>` when a different
/// file already took that key during this call
fn unique_key(key_prefix: &str, file_name: &str, taken: &HashSet<String>) -> String {
    let key = join_key(key_prefix, file_name);
    if !taken.contains(&key) {
        return key;
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    (1..)
        .map(|n| match extension {
            Some(ext) => join_key(key_prefix, &format!("{stem}_{n}.{ext}")),
            None => join_key(key_prefix, &format!("{stem}_{n}")),
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(key)
}

fn join_key(parent: &str, segment: &str) -> String {
    match (parent.is_empty(), segment.is_empty()) {
        (_, true) => parent.to_string(),
        (true, false) => segment.to_string(),
        (false, false) => format!("{parent}/{segment}"),
    }
}
