//! Engine error types.
//!
//! These stay internal to the pipeline: the executor boundary converts every
//! one of them into an `ActionResult { success: false, message }` before the
//! host sees anything.

use thiserror::Error;

use crate::store::StoreError;

use super::validator::ValidationError;

/// Errors that can occur inside the action pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Pre-flight validation rejected the action.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A store call failed.
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    /// An incremental build step failed. The partially built document (if
    /// any) is named so the operator can inspect or remove it.
    #[error("build failed at step '{step}'{}: {reason}", partial_note(.document_id))]
    Build {
        step: String,
        document_id: Option<String>,
        reason: String,
    },

    /// The action payload is unusable for its operation.
    #[error("invalid payload: {reason}")]
    Payload { reason: String },

    /// JSON (de)serialization failure.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

fn partial_note(document_id: &Option<String>) -> String {
    match document_id {
        Some(id) => format!(" (partially built document: '{id}')"),
        None => String::new(),
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization {
            reason: e.to_string(),
        }
    }
}
