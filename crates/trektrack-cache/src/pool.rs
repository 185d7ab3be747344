//! SQLite pool behind the key/value cache
//!
//! File databases run in WAL mode with `synchronous = NORMAL`: a crash can
//! lose the last few cache writes but never corrupts the file, and the
//! cache is rebuilt by the next sync anyway. The `kv_store` schema is
//! applied every time a pool opens.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use trektrack_core::config::StorageConfig;

use crate::CacheError;

const SCHEMA: &str = include_str!("migrations/20260301_initial.sql");

/// Connection limits taken from the `storage` config section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl PoolSettings {
    pub fn from_storage(storage: &StorageConfig) -> Self {
        Self {
            max_connections: storage.max_connections.max(1),
            busy_timeout: Duration::from_millis(storage.busy_timeout_ms),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_storage(&StorageConfig::default())
    }
}

/// Pool of connections to the cache database
#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
    /// `None` for in-memory databases
    path: Option<PathBuf>,
}

impl DatabasePool {
    /// Opens the database configured in `storage`
    pub async fn open(storage: &StorageConfig) -> Result<Self, CacheError> {
        Self::open_with(&storage.database, PoolSettings::from_storage(storage)).await
    }

    /// Opens `db_path` with the default limits
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        Self::open_with(db_path, PoolSettings::default()).await
    }

    /// Opens `db_path`, creating the file and its parent directories
    ///
    /// # Errors
    ///
    /// `CacheError::ConnectionFailed` if the directory or the database cannot
    /// be opened, `CacheError::MigrationFailed` if the schema cannot be
    /// applied.
    pub async fn open_with(db_path: &Path, settings: PoolSettings) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Cannot create cache directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(settings.busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Cannot open cache database {}: {e}",
                    db_path.display()
                ))
            })?;
        apply_schema(&pool).await?;

        info!(
            path = %db_path.display(),
            max_connections = settings.max_connections,
            busy_timeout_ms = settings.busy_timeout.as_millis() as u64,
            "Cache database opened"
        );
        Ok(Self {
            pool,
            path: Some(db_path.to_path_buf()),
        })
    }

    /// Single-connection in-memory database
    ///
    /// Every SQLite connection to `:memory:` gets its own database, so the
    /// pool never opens a second one.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Cannot open in-memory cache: {e}"))
            })?;
        apply_schema(&pool).await?;
        debug!("In-memory cache database opened");
        Ok(Self { pool, path: None })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Database file, if the cache is on disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes every connection; pending WAL frames are checkpointed by SQLite
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), CacheError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| CacheError::MigrationFailed(format!("kv_store schema: {e}")))?;
    Ok(())
}
