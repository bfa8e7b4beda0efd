//! In-memory storage backend
//!
//! Default backend when no state path is configured. Data is lost on restart.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{StateStore, StorageError, StoredState};

/// In-memory state store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Option<StoredState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, state: &StoredState) -> Result<(), StorageError> {
        debug!(epoch = ?state.epoch(), "Saving directory state in memory");
        *self.state.write().await = Some(state.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<StoredState>, StorageError> {
        Ok(self.state.read().await.clone())
    }
}
