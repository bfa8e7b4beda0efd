//! Error types for the key directory

use thiserror::Error;

/// Result type alias using KeydirError
pub type Result<T> = std::result::Result<T, KeydirError>;

/// Errors raised by directory-side and structural operations
#[derive(Error, Debug)]
pub enum KeydirError {
    /// The directory's signing key is not loaded
    #[error("Signing key unavailable")]
    SigningUnavailable,

    /// An epoch advance did not follow the previous epoch
    #[error("Out of order epoch: expected {expected}, got {actual}")]
    OutOfOrderEpoch { expected: u64, actual: u64 },

    /// The requested epoch has not been published yet
    #[error("Epoch {0} has not been published")]
    EpochNotPublished(u64),

    /// VRF proof did not verify for the given name and index
    #[error("Invalid VRF proof")]
    InvalidVrfProof,

    /// Request carried unusable input
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Descent ran past the last index bit
    #[error("Tree depth exceeded")]
    TreeDepthExceeded,

    /// Persisted state does not reproduce the committed roots
    #[error("State mismatch: {0}")]
    StateMismatch(String),

    /// COSE encoding/decoding error
    #[error("COSE error: {0}")]
    CoseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<ed25519_dalek::SignatureError> for KeydirError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        KeydirError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for KeydirError {
    fn from(err: serde_json::Error) -> Self {
        KeydirError::SerializationError(err.to_string())
    }
}

impl From<coset::CoseError> for KeydirError {
    fn from(err: coset::CoseError) -> Self {
        KeydirError::CoseError(format!("{:?}", err))
    }
}
