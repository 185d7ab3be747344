//! Typed access to the persisted key layout
//!
//! [`MetadataCache`] wraps any [`IDurableStore`] and (de)serializes the
//! documents the sync engine reads and writes: merged records under
//! `metadata/` and operation snapshots under `progress/`.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use trektrack_core::{
    domain::{EntityId, MetadataRecord, Operation, OperationId},
    ports::{keys, IDurableStore},
};

use crate::CacheError;

/// Typed view over the durable store
#[derive(Clone)]
pub struct MetadataCache {
    store: Arc<dyn IDurableStore>,
}

impl MetadataCache {
    /// Wraps a store
    pub fn new(store: Arc<dyn IDurableStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn IDurableStore> {
        &self.store
    }

    /// Reads the cached record of an entity
    pub async fn get_record(
        &self,
        entity_id: &EntityId,
    ) -> Result<Option<MetadataRecord>, CacheError> {
        self.get(&keys::metadata(entity_id)).await
    }

    /// Overwrites the cached record of an entity
    pub async fn put_record(
        &self,
        entity_id: &EntityId,
        record: &MetadataRecord,
    ) -> Result<(), CacheError> {
        self.put(&keys::metadata(entity_id), record).await
    }

    /// Reads a persisted operation snapshot
    pub async fn get_progress(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<Operation>, CacheError> {
        self.get(&keys::progress(operation_id)).await
    }

    /// Persists an operation snapshot
    pub async fn put_progress(&self, operation: &Operation) -> Result<(), CacheError> {
        self.put(&keys::progress(operation.id()), operation).await
    }

    /// Deletes cached records and returns how many were removed
    ///
    /// With `Some(entity_id)` only that entity's record is removed; with
    /// `None` every record under `metadata/` is removed. Progress snapshots
    /// and pending conflicts are left alone.
    pub async fn clear(&self, entity_id: Option<&EntityId>) -> Result<u64, CacheError> {
        let removed = match entity_id {
            Some(id) => u64::from(self.store.delete(&keys::metadata(id)).await?),
            None => {
                let keys = self.store.keys_with_prefix(keys::METADATA_PREFIX).await?;
                let mut removed = 0;
                for key in keys {
                    if self.store.delete(&key).await? {
                        removed += 1;
                    }
                }
                removed
            }
        };
        info!(removed, scope = ?entity_id.map(|e| e.as_str()), "Metadata cache cleared");
        Ok(removed)
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(value) = self.store.get(key).await? else {
            return Ok(None);
        };
        let decoded = serde_json::from_value(value).map_err(|e| {
            CacheError::SerializationError(format!("Failed to decode {key}: {e}"))
        })?;
        Ok(Some(decoded))
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|e| {
            CacheError::SerializationError(format!("Failed to encode {key}: {e}"))
        })?;
        self.store.set(key, &value).await?;
        debug!(key = %key, "Document persisted");
        Ok(())
    }
}
