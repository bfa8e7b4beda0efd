//! Key Directory Server
//!
//! HTTP front end for an authenticated key directory. Registrations are
//! staged and committed at the next epoch; every epoch is sealed by a
//! signed tree root that clients verify with `keydir_core::ConsistencyChecks`.
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check, false while the signing key is unloaded
//! - `GET /v1/directory` - Public key, policies and latest epoch
//! - `GET /v1/policies` - Committed directory policies
//! - `POST /v1/registrations` - Register a name, returning a signed promise
//! - `GET /v1/lookup/{name}?since=` - Look a name up in the latest epoch
//! - `GET /v1/lookup/{name}/epochs/{epoch}` - Look a name up in a past epoch
//! - `GET /v1/epoch` - Latest epoch and its signed root
//! - `POST /v1/epoch/advance` - Publish the next epoch now
//! - `GET /v1/strs?from=&to=` - Signed roots in an epoch range
//! - `GET /v1/strs/{epoch}` - One signed root

pub mod api;
pub mod config;
pub mod epochs;
pub mod keys;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use config::{ConfigError, ServerConfig};
pub use epochs::{advance_and_persist, spawn_ticker};
pub use keys::DirectoryKeys;
pub use storage::{FileStore, MemoryStore, StateStore, StorageError, StoredState};

use keydir_core::Directory;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Error raised while bringing the directory up
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Directory(#[from] keydir_core::KeydirError),
}

/// Restore the directory from `store`, or create a fresh one.
///
/// A fresh directory publishes its genesis epoch and is persisted at once.
/// A restored directory keeps the policies its chain commits to, so its
/// epoch deadline is the one clients were promised.
pub async fn open_directory(
    keys: DirectoryKeys,
    store: &dyn StateStore,
    config: &ServerConfig,
) -> Result<Directory, StartupError> {
    let (signing_key, vrf) = keys.into_parts();

    match store.load().await? {
        Some(stored) => {
            info!(saved_at = %stored.saved_at, epoch = ?stored.epoch(), "Restoring directory state");
            let directory = Directory::restore(
                stored.directory,
                Some(signing_key),
                vrf,
                config.directory_config(),
            )?;
            let committed = directory.policies().epoch_deadline;
            if committed != config.epoch_deadline {
                warn!(
                    committed,
                    configured = config.epoch_deadline,
                    "Configured epoch deadline ignored, ticking at the committed policy"
                );
            }
            Ok(directory)
        }
        None => {
            let directory = Directory::new(signing_key, vrf, config.directory_config())?;
            store.save(&StoredState::new(directory.export_state()?)).await?;
            info!("Created new directory");
            Ok(directory)
        }
    }
}

/// Shared state for a directory behind `store`
pub fn app_state(directory: Directory, store: Arc<dyn StateStore>, config: ServerConfig) -> Arc<AppState> {
    Arc::new(AppState::new(Arc::new(directory), store, config))
}

/// Period of the epoch ticker: the deadline committed in the policies
pub fn tick_period(directory: &Directory) -> Duration {
    Duration::from_secs(directory.policies().epoch_deadline)
}
