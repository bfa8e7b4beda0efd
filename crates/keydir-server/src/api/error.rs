//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keydir_core::KeydirError;
use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Epoch {0} has not been published")]
    EpochNotPublished(u64),

    #[error("Signing key unavailable")]
    SigningUnavailable,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            ApiError::EpochNotPublished(epoch) => (
                StatusCode::NOT_FOUND,
                "EPOCH_NOT_PUBLISHED",
                self.to_string(),
                Some(serde_json::json!({ "epoch": epoch })),
            ),
            ApiError::SigningUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SIGNING_UNAVAILABLE",
                self.to_string(),
                None,
            ),
            ApiError::Storage(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                err.to_string(),
                None,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<KeydirError> for ApiError {
    fn from(err: KeydirError) -> Self {
        match err {
            KeydirError::MalformedRequest(msg) => ApiError::BadRequest(msg),
            KeydirError::EpochNotPublished(epoch) => ApiError::EpochNotPublished(epoch),
            KeydirError::SigningUnavailable => ApiError::SigningUnavailable,
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(err: base64::DecodeError) -> Self {
        ApiError::BadRequest(format!("Invalid base64 encoding: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(KeydirError::MalformedRequest("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(KeydirError::EpochNotPublished(9)), StatusCode::NOT_FOUND),
            (ApiError::from(KeydirError::SigningUnavailable), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::from(KeydirError::TreeDepthExceeded), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
