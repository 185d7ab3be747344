//! Durable store port (driven/secondary port)
//!
//! A minimal key/value interface over JSON values. The engine persists three
//! kinds of documents:
//!
//! | key                     | value                  |
//! |-------------------------|------------------------|
//! | `metadata/{entity_id}`  | `MetadataRecord`       |
//! | `progress/{op_id}`      | `Operation` snapshot   |
//! | `conflicts/{entity_id}` | `PendingConflicts`     |
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, in-memory, ...) and don't need domain-level classification.
//! - Values are plain `serde_json::Value`; typed access lives in the cache
//!   crate.

use serde_json::Value;

use crate::domain::newtypes::{EntityId, OperationId};

/// Key prefixes for persisted documents
pub mod keys {
    use super::{EntityId, OperationId};

    /// Prefix of merged metadata records
    pub const METADATA_PREFIX: &str = "metadata/";
    /// Prefix of operation progress snapshots
    pub const PROGRESS_PREFIX: &str = "progress/";
    /// Prefix of pending manual-review conflicts
    pub const CONFLICTS_PREFIX: &str = "conflicts/";

    /// `metadata/{entity_id}`
    pub fn metadata(entity_id: &EntityId) -> String {
        format!("{METADATA_PREFIX}{entity_id}")
    }

    /// `progress/{operation_id}`
    pub fn progress(operation_id: &OperationId) -> String {
        format!("{PROGRESS_PREFIX}{operation_id}")
    }

    /// `conflicts/{entity_id}`
    pub fn conflicts(entity_id: &EntityId) -> String {
        format!("{CONFLICTS_PREFIX}{entity_id}")
    }
}

/// Port trait for durable key/value persistence
#[async_trait::async_trait]
pub trait IDurableStore: Send + Sync {
    /// Reads the value stored under `key`
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()>;

    /// Deletes `key`; returns true if it existed
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// Lists every key starting with `prefix`, sorted ascending
    async fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}
