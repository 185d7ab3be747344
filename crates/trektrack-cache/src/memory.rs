//! In-memory implementation of IDurableStore
//!
//! Used by tests and by the daemon when `storage.database` is `:memory:`.
//! Nothing survives the process.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;

use trektrack_core::ports::IDurableStore;

/// BTreeMap-backed key/value store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl IDurableStore for InMemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.write().remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
