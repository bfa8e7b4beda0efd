//! Epoch and signed tree root handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use keydir_core::{Policies, SerializablePublicKey, SignedTreeRoot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;
use crate::api::error::ApiError;
use crate::epochs::advance_and_persist;

/// Latest epoch and its signed root
#[derive(Debug, Serialize, Deserialize)]
pub struct EpochResponse {
    pub epoch: u64,
    #[serde(rename = "str")]
    pub root: SignedTreeRoot,
    pub pending: usize,
}

/// Public parameters a client pins before talking to the directory
#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryInfo {
    pub public_key: SerializablePublicKey,
    pub policies: Policies,
    pub epoch: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StrRangeQuery {
    #[serde(default)]
    pub from: u64,
    pub to: Option<u64>,
}

/// GET /v1/epoch
pub async fn current_epoch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EpochResponse>, ApiError> {
    let epoch = state.directory.current_epoch();
    let root = state
        .directory
        .get_str(epoch)
        .ok_or_else(|| ApiError::Internal(format!("No signed root for epoch {}", epoch)))?;

    Ok(Json(EpochResponse {
        epoch,
        root,
        pending: state.directory.pending_count(),
    }))
}

/// Publish the next epoch now
///
/// POST /v1/epoch/advance
pub async fn advance_epoch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SignedTreeRoot>, ApiError> {
    Ok(Json(advance_and_persist(&state).await?))
}

/// Signed roots in a closed epoch range, clamped to what is published
///
/// GET /v1/strs?from=&to=
pub async fn list_strs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StrRangeQuery>,
) -> Json<Vec<SignedTreeRoot>> {
    let to = query.to.unwrap_or_else(|| state.directory.current_epoch());
    Json(state.directory.str_range(query.from, to))
}

/// GET /v1/strs/{epoch}
pub async fn get_str(
    State(state): State<Arc<AppState>>,
    Path(epoch): Path<u64>,
) -> Result<Json<SignedTreeRoot>, ApiError> {
    state
        .directory
        .get_str(epoch)
        .map(Json)
        .ok_or(ApiError::EpochNotPublished(epoch))
}

/// GET /v1/directory
pub async fn directory_info(State(state): State<Arc<AppState>>) -> Json<DirectoryInfo> {
    Json(DirectoryInfo {
        public_key: SerializablePublicKey::from(&state.directory.public_key()),
        policies: state.directory.policies().clone(),
        epoch: state.directory.current_epoch(),
    })
}

/// GET /v1/policies
pub async fn policies(State(state): State<Arc<AppState>>) -> Json<Policies> {
    Json(state.directory.policies().clone())
}
