//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures and invalid state transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid entity identifier
    #[error("Invalid entity ID: {0}")]
    InvalidEntityId(String),

    /// Invalid source name
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// A job counter update would exceed the operation's total
    #[error("Job accounting overflow: {processed} processed of {total} total")]
    JobOverflow {
        /// Jobs already accounted for
        processed: u32,
        /// Total jobs of the operation
        total: u32,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
