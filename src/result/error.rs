//! Result model error types

use std::path::PathBuf;

/// Errors raised by the result model and its local persistence
#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error("Not a valid file [{path}] attached to result [{result}]")]
    MissingFile { result: String, path: PathBuf },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed result document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ResultError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ResultError::Io {
            path: path.into(),
            source,
        }
    }
}
