//! API request handlers

pub mod epochs;
pub mod lookup;
pub mod registration;

pub use epochs::{
    advance_epoch, current_epoch, directory_info, get_str, list_strs, policies, DirectoryInfo,
    EpochResponse, StrRangeQuery,
};
pub use lookup::{lookup, lookup_in_epoch, LookupQuery};
pub use registration::{register, RegisterRequest};

use keydir_core::Directory;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

use crate::api::error::ApiError;
use crate::config::ServerConfig;
use crate::storage::{StateStore, StoredState};

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    pub directory: Arc<Directory>,
    pub store: Arc<dyn StateStore>,
    pub config: ServerConfig,
    /// Serializes export-then-save so an older snapshot never overwrites a newer one
    persist_lock: Mutex<()>,
}

impl AppState {
    pub fn new(directory: Arc<Directory>, store: Arc<dyn StateStore>, config: ServerConfig) -> Self {
        Self {
            directory,
            store,
            config,
            persist_lock: Mutex::new(()),
        }
    }

    /// Write the directory's current state to the store.
    ///
    /// On failure the in-memory state is kept as it is; each save writes
    /// the complete state, so the next one that succeeds catches up.
    pub async fn persist(&self) -> Result<(), ApiError> {
        let _guard = self.persist_lock.lock().await;
        let state = StoredState::new(self.directory.export_state()?);
        self.store.save(&state).await.map_err(|e| {
            error!(
                error = %e,
                epoch = ?state.epoch(),
                pending = state.directory.pending.len(),
                "Failed to persist directory state, keeping it in memory"
            );
            ApiError::from(e)
        })
    }
}
