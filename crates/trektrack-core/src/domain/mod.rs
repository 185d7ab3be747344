//! Domain entities and business logic
//!
//! This module contains the core domain types for Trektrack:
//! - Newtypes for validated identifiers (entities, operations, sources)
//! - Sync operations with their lifecycle and job counters
//! - Cached metadata records and field-level conflicts
//! - Strategy selectors and the background capability snapshot
//! - Domain-specific error types

pub mod capability;
pub mod errors;
pub mod newtypes;
pub mod operation;
pub mod record;
pub mod strategy;

// Re-export commonly used types
pub use capability::{CapabilitySnapshot, EnvironmentInfo};
pub use errors::DomainError;
pub use newtypes::*;
pub use operation::{
    EntityConflicts, Operation, OperationKind, OperationStatus, Priority, SyncRequest,
};
pub use record::{is_empty_value, FieldConflict, MetadataRecord, PendingConflicts};
pub use strategy::{ConflictStrategy, FallbackStrategy};
