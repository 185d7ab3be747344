//! Trektrack Sync - Metadata synchronization engine
//!
//! Provides:
//! - Per-entity locking with a priority-ordered pending queue
//! - Source-partitioned batch scheduling with inter-batch pacing
//! - Operation progress tracking with retention and persisted snapshots
//! - Background capability detection and fallback dispatch
//!
//! ## Modules
//!
//! - [`engine`] - [`SyncEngine`] handle tying everything together
//! - [`scheduler`] - Batch scheduler driving lock → fetch → merge → persist
//! - [`lock_table`] / [`pending_queue`] - Entity mutual exclusion
//! - [`progress`] - Operation lifecycle, retention and observers
//! - [`capability`] / [`dispatcher`] - Deferred execution and fallbacks
//! - [`events`] / [`metrics`] - Broadcast events and Prometheus metrics

pub mod batch;
pub mod capability;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod lock_table;
pub mod metrics;
pub mod pending_queue;
pub mod progress;
pub mod scheduler;

pub use engine::{StartSyncResponse, SyncEngine, SyncEngineBuilder};
pub use events::{EventBus, SyncEvent};

use thiserror::Error;

use trektrack_core::domain::EntityId;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request was rejected before an operation was created
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The entity is locked by another operation
    #[error("Entity locked: {0}")]
    EntityLocked(EntityId),

    /// No live or persisted operation has this id
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// A domain-level error propagated from trektrack-core
    #[error("Domain error: {0}")]
    Domain(#[from] trektrack_core::domain::DomainError),

    /// The durable cache failed
    #[error("Cache error: {0}")]
    Cache(#[from] trektrack_cache::CacheError),

    /// The review workflow failed
    #[error("Conflict error: {0}")]
    Conflict(#[from] trektrack_conflict::ConflictError),

    /// A source could not be prepared; its entities are left for a retry
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
