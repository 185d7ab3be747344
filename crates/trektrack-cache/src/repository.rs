//! SQLite implementation of IDurableStore
//!
//! Documents are stored as JSON text in a single `kv_store` table.
//!
//! | Column       | SQL Type | Strategy                                  |
//! |--------------|----------|-------------------------------------------|
//! | `key`        | TEXT     | slash-separated path, primary key         |
//! | `value`      | TEXT     | `serde_json::to_string` / `from_str`      |
//! | `updated_at` | TEXT     | ISO 8601 via `to_rfc3339()`               |

use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use trektrack_core::ports::IDurableStore;

use crate::CacheError;

/// SQLite-backed key/value store
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Creates a store over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored keys
    pub async fn len(&self) -> Result<u64, CacheError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_store")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let text: String = row.try_get("value")?;
        let value = serde_json::from_str(&text).map_err(|e| {
            CacheError::SerializationError(format!("Failed to decode value at {key}: {e}"))
        })?;
        Ok(Some(value))
    }

    async fn set_raw(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        let text = serde_json::to_string(value).map_err(|e| {
            CacheError::SerializationError(format!("Failed to encode value at {key}: {e}"))
        })?;
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys_raw(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let prefix_len = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
        let rows = sqlx::query("SELECT key FROM kv_store WHERE substr(key, 1, ?) = ? ORDER BY key")
            .bind(prefix_len)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(CacheError::from))
            .collect()
    }
}

#[async_trait::async_trait]
impl IDurableStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.get_raw(key).await?)
    }

    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.set_raw(key, value).await?;
        tracing::trace!(key = %key, "Stored value");
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.delete_raw(key).await?)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.keys_raw(prefix).await?)
    }
}
