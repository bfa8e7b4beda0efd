//! Key lookup handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use keydir_core::DirectoryResponse;
use serde::Deserialize;
use std::sync::Arc;

use super::AppState;
use crate::api::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    /// Latest epoch the caller has verified
    pub since: Option<u64>,
}

/// Look a name up in the latest epoch
///
/// GET /v1/lookup/{name}
pub async fn lookup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<DirectoryResponse>, ApiError> {
    Ok(Json(state.directory.lookup_since(&name, query.since)?))
}

/// Look a name up in a past epoch
///
/// GET /v1/lookup/{name}/epochs/{epoch}
pub async fn lookup_in_epoch(
    State(state): State<Arc<AppState>>,
    Path((name, epoch)): Path<(String, u64)>,
) -> Result<Json<DirectoryResponse>, ApiError> {
    Ok(Json(state.directory.lookup_in_epoch(&name, epoch)?))
}
