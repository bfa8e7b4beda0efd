//! API module for the directory server

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    /// False while the signing key is unloaded and epochs cannot advance
    pub ready: bool,
    pub kid: String,
    pub epoch: u64,
    pub pending: usize,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: state.directory.has_signing_key(),
        kid: state.directory.public_key().kid().to_string(),
        epoch: state.directory.current_epoch(),
        pending: state.directory.pending_count(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Directory endpoints
        .route("/v1/directory", get(handlers::directory_info))
        .route("/v1/policies", get(handlers::policies))
        .route("/v1/registrations", post(handlers::register))
        .route("/v1/lookup/{name}", get(handlers::lookup))
        .route("/v1/lookup/{name}/epochs/{epoch}", get(handlers::lookup_in_epoch))
        // Epoch endpoints
        .route("/v1/epoch", get(handlers::current_epoch))
        .route("/v1/epoch/advance", post(handlers::advance_epoch))
        .route("/v1/strs", get(handlers::list_strs))
        .route("/v1/strs/{epoch}", get(handlers::get_str))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
