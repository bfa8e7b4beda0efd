//! File storage backend
//!
//! Keeps the snapshot as one JSON document. Writes go to a sibling temp
//! file that is renamed over the target, so a crash never leaves a
//! truncated snapshot behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{StateStore, StorageError, StoredState};

/// JSON file state store
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn save(&self, state: &StoredState) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(path = %self.path.display(), epoch = ?state.epoch(), bytes = bytes.len(), "Directory state saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<StoredState>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: StoredState = serde_json::from_slice(&bytes)?;
        info!(path = %self.path.display(), epoch = ?state.epoch(), "Directory state loaded");
        Ok(Some(state))
    }
}
