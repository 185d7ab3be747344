//! Error types for the conflict resolver

use thiserror::Error;

/// Errors that can occur while reviewing or persisting conflicts
///
/// [`crate::ConflictResolver::resolve`] never returns these; it falls back to
/// the best prior record instead. They surface from the review workflow.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// No pending conflict exists for the entity/field pair
    #[error("no pending conflict for {entity_id} field '{field}'")]
    NotFound { entity_id: String, field: String },

    /// A persisted document could not be decoded
    #[error("corrupt document at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
