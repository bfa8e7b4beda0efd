//! Epoch advancement
//!
//! Epochs advance on a fixed deadline through a background ticker, or on
//! demand through the API. Either way the new state is persisted before
//! the advance is reported.

use keydir_core::SignedTreeRoot;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

/// Publish the next epoch and persist the result.
///
/// A published epoch cannot be withdrawn, so a failed save leaves it
/// published in memory and reports the error; the next successful save
/// persists it along with everything after.
pub async fn advance_and_persist(state: &AppState) -> Result<SignedTreeRoot, ApiError> {
    let root = state.directory.tick()?;
    state.persist().await?;
    Ok(root)
}

/// Advance the directory every `period`.
///
/// Returns `None` when `period` is zero. Failed advances are logged and
/// retried on the next tick with the staged registrations intact.
pub fn spawn_ticker(state: Arc<AppState>, period: Duration) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        info!("Epoch ticker disabled");
        return None;
    }

    info!(period_secs = period.as_secs(), "Starting epoch ticker");
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match advance_and_persist(&state).await {
                Ok(root) => debug!(epoch = root.epoch(), "Scheduled epoch advance"),
                Err(e) => warn!(error = %e, "Scheduled epoch advance failed"),
            }
        }
    }))
}
