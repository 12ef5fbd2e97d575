//! Result documents on the worker's disk
//!
//! Each task owns one JSON document, `<dir>/result_<normalized name>.json`.
//! A task that does not know its name yet writes to the "current" document,
//! `<dir>/result.json`, which is copied to its named location on finalize.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::naming::normalize;
use crate::result::{ResultError, ResultNode};

const CURRENT_FILE_NAME: &str = "result.json";

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name (without directory) of the document for `name`
    pub fn file_name_for(name: &str) -> String {
        if name.is_empty() {
            CURRENT_FILE_NAME.to_string()
        } else {
            format!("result_{}.json", normalize(name))
        }
    }

    /// Path of the document for `name`; an empty name is the current document
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(Self::file_name_for(name))
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE_NAME)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Write `result` to the document named after it
    pub fn dump(&self, result: &ResultNode) -> Result<PathBuf, ResultError> {
        let path = self.path_for(&result.name);
        self.write(&path, result)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<ResultNode, ResultError> {
        self.read(&self.path_for(name))
    }

    pub fn dump_current(&self, result: &ResultNode) -> Result<PathBuf, ResultError> {
        let path = self.current_path();
        self.write(&path, result)?;
        Ok(path)
    }

    pub fn load_current(&self) -> Result<ResultNode, ResultError> {
        self.read(&self.current_path())
    }

    /// Copy the current document to the one for `name`, reload it and fix
    /// its name. The current document stays in place.
    pub fn finalize_current(&self, name: &str) -> Result<ResultNode, ResultError> {
        let source = self.current_path();
        let target = self.path_for(name);
        std::fs::copy(&source, &target).map_err(|e| ResultError::io(&source, e))?;
        info!(
            from = %source.display(),
            to = %target.display(),
            "Copied current result document"
        );

        let mut result = self.read(&target)?;
        result.name = name.to_string();
        self.write(&target, &result)?;
        Ok(result)
    }

    fn write(&self, path: &Path, result: &ResultNode) -> Result<(), ResultError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ResultError::io(&self.dir, e))?;
        let bytes = result.to_json()?;
        std::fs::write(path, bytes).map_err(|e| ResultError::io(path, e))?;
        debug!(result = %result.name, path = %path.display(), "Result dumped");
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<ResultNode, ResultError> {
        let bytes = std::fs::read(path).map_err(|e| ResultError::io(path, e))?;
        ResultNode::from_json(&bytes).map_err(|source| ResultError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }
}
