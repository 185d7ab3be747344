//! Trektrack Cache - Durable metadata persistence
//!
//! Key/value storage for:
//! - Merged per-episode metadata records
//! - Operation progress snapshots
//! - Conflicts awaiting manual review
//!
//! ## Architecture
//!
//! This crate implements the `IDurableStore` port from `trektrack-core`
//! with SQLite (and an in-memory variant for tests). It is a driven
//! (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteKeyValueStore`] - SQLite `IDurableStore` implementation
//! - [`InMemoryStore`] - Process-local `IDurableStore` implementation
//! - [`MetadataCache`] - Typed access to the persisted key layout
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use trektrack_cache::{DatabasePool, MetadataCache, SqliteKeyValueStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/trektrack/trektrack.db")).await?;
//! let store = Arc::new(SqliteKeyValueStore::new(pool.pool().clone()));
//! let cache = MetadataCache::new(store);
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod metadata;
pub mod pool;
pub mod repository;

pub use memory::InMemoryStore;
pub use metadata::MetadataCache;
pub use pool::{DatabasePool, PoolSettings};
pub use repository::SqliteKeyValueStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of a document failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The underlying store reported an error
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
