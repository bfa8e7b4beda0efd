//! Name registration handler

use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keydir_core::{DirectoryResponse, ResponseCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::AppState;
use crate::api::error::ApiError;

/// Request to bind a key to a name
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,

    /// Base64-encoded key material
    pub key: String,

    /// Latest epoch the caller has verified; roots after it are returned
    #[serde(default)]
    pub since: Option<u64>,
}

/// Register a name
///
/// POST /v1/registrations
///
/// A successful registration is persisted before the signed promise is
/// returned, so the promise survives a restart. If the save fails the
/// caller gets an error and no promise, but the registration stays staged
/// in memory; the next successful save, which writes the whole state,
/// persists it.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<DirectoryResponse>, ApiError> {
    let key = BASE64.decode(&request.key)?;
    let response = state
        .directory
        .register_since(&request.name, &key, request.since)?;

    if response.code == ResponseCode::Success {
        state.persist().await?;
        info!(name = %request.name, "Registration accepted");
    }

    Ok(Json(response))
}
