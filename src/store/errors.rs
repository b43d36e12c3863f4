//! Document-store error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. The executor
//! never lets these escape — they are normalized into action results at the
//! engine boundary.

use thiserror::Error;

/// Errors that can occur while talking to the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed document does not exist.
    #[error("document not found: '{id}'")]
    NotFound { id: String },

    /// Non-2xx HTTP response from the store endpoint.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// TCP/transport-level failure reaching the store.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The store did not respond within the configured timeout.
    #[error("store timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// A field path could not be parsed or resolved against the document.
    #[error("invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A write was rejected because its literal nesting is too deep.
    #[error("write rejected: nesting depth {depth} exceeds the ceiling of {ceiling}")]
    TooDeep { depth: usize, ceiling: usize },

    /// Concurrent edit conflict reported by the backend.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// Asset upload or import failed.
    #[error("asset pipeline error: {reason}")]
    Asset { reason: String },

    /// JSON (de)serialization failure.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Configuration loading or validation error.
    #[error("store config error: {reason}")]
    Config { reason: String },
}

impl StoreError {
    /// Whether a retry with backoff is worth attempting.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout { .. } | StoreError::Transport { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization {
            reason: e.to_string(),
        }
    }
}
