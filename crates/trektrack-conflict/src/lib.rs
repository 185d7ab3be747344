//! Trektrack Conflict - Metadata merge and conflict resolution
//!
//! Provides:
//! - Field-level conflict detection between cached and fetched records
//! - Merge strategies: latest-wins, merge-with-priority, manual-review
//! - Configurable source priority ordering
//! - Manual review persistence and application

pub mod detector;
pub mod error;
pub mod merge;
pub mod priority;
pub mod resolver;
pub mod review;

pub use error::ConflictError;
pub use priority::SourcePriority;
pub use resolver::{ConflictResolver, Resolution};
pub use review::ReviewChoice;
