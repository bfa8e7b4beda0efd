//! Storage abstraction for directory state
//!
//! The directory keeps its working state in memory; a store holds the
//! exported snapshot so the service can restore it after a restart.
//! Every published epoch is persisted before the advance is reported.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keydir_core::DirectoryState;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Persisted directory snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    /// When this snapshot was written
    pub saved_at: DateTime<Utc>,

    pub directory: DirectoryState,
}

impl StoredState {
    pub fn new(directory: DirectoryState) -> Self {
        Self {
            saved_at: Utc::now(),
            directory,
        }
    }

    /// Latest epoch in the persisted chain
    pub fn epoch(&self) -> Option<u64> {
        self.directory.strs.last().map(|root| root.epoch())
    }
}

/// Storage backend trait for directory state
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait StateStore: Send + Sync + Debug {
    /// Replace the persisted snapshot
    async fn save(&self, state: &StoredState) -> Result<(), StorageError>;

    /// Load the persisted snapshot, if any
    async fn load(&self) -> Result<Option<StoredState>, StorageError>;
}
