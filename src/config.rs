//! Settings
//!
//! Loaded from `results.yaml`; every field is optional:
//!
//! ```yaml
//! temp_dir: ./ci/tmp
//! store_root: ./ci/store
//! store_prefix: PRs/1234/3f2a9c
//! max_attempts: 50
//! max_retry_delay_ms: 2000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::ResultStore;
use crate::sync::{SyncConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RETRY_DELAY};

pub const DEFAULT_SETTINGS_FILE: &str = "results.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Local result documents and task logs
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Directory backing the shared object store
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Namespace of this run inside the object store
    #[serde(default)]
    pub store_prefix: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./ci/tmp")
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./ci/store")
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_max_retry_delay_ms() -> u64 {
    DEFAULT_MAX_RETRY_DELAY.as_millis() as u64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            store_root: default_store_root(),
            store_prefix: String::new(),
            max_attempts: default_max_attempts(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content).map_err(|e| ConfigError::Yaml {
            file: path.display().to_string(),
            error: e,
        })?;
        Ok(settings)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_attempts: self.max_attempts,
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }

    pub fn result_store(&self) -> ResultStore {
        ResultStore::new(&self.temp_dir)
    }
}
