//! trektrack daemon - background metadata synchronization service
//!
//! This binary runs as a user service and handles:
//! - The sync engine and its durable SQLite cache
//! - The request loop and the D-Bus interface for UI clients
//! - Deferred operations registered by the engine
//! - Periodic eviction of finished operations
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Every long-running piece is a task on one `TaskTracker`, stopped by a
//! shared `CancellationToken` that is triggered on SIGTERM or SIGINT. On
//! shutdown the engine cancels running operations at their next sub-batch
//! boundary before the database pool is closed.

mod host;
mod notifier;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trektrack_cache::{DatabasePool, InMemoryStore, SqliteKeyValueStore};
use trektrack_core::config::{Config, LoggingConfig};
use trektrack_core::ports::IDurableStore;
use trektrack_ipc::server::DEFAULT_CHANNEL_CAPACITY;
use trektrack_ipc::service::{DbusService, DBUS_NAME};
use trektrack_ipc::{IpcError, IpcServer};
use trektrack_sources::HttpMetadataFetcher;
use trektrack_sync::SyncEngine;

use crate::host::{retention_sweeper, DeferredRunner, LocalBackgroundHost};
use crate::notifier::DesktopNotifier;

/// `storage.database` value selecting the in-memory store
const IN_MEMORY_DATABASE: &str = ":memory:";

// ============================================================================
// DaemonService
// ============================================================================

/// Wires the engine to its adapters and runs the daemon's tasks
struct DaemonService {
    config: Config,
    /// `None` when the cache lives in memory
    db_pool: Option<DatabasePool>,
    engine: SyncEngine,
    deferred: DeferredRunner,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the database and builds the engine
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let (db_pool, store) = open_store(&config).await?;

        let fetcher = HttpMetadataFetcher::from_config(&config)
            .context("Failed to configure metadata sources")?;
        let (host, deferred) = LocalBackgroundHost::new();
        let notifier = DesktopNotifier::connect().await;

        let engine = SyncEngine::builder(Arc::new(fetcher), store)
            .config(&config)
            .background_host(Arc::new(host))
            .notifications(Arc::new(notifier))
            .build()
            .context("Failed to build sync engine")?;

        Ok(Self {
            config,
            db_pool,
            engine,
            deferred,
            shutdown,
        })
    }

    /// Runs until the shutdown token fires
    async fn run(self) -> Result<()> {
        let Self {
            config,
            db_pool,
            engine,
            deferred,
            shutdown,
        } = self;
        let tasks = TaskTracker::new();

        let (server, client) = IpcServer::channel(engine.clone(), DEFAULT_CHANNEL_CAPACITY);
        tasks.spawn(server.run(shutdown.clone()));

        // Held for the daemon's lifetime; dropping it releases the bus name.
        let dbus = DbusService::new(client);
        let _dbus_connection = match dbus.start().await {
            Ok(connection) => {
                info!("D-Bus service started, acquired name {}", DBUS_NAME);
                let forwarder_conn = connection.clone();
                let token = shutdown.clone();
                tasks.spawn(async move {
                    if let Err(e) = dbus.forward_events(forwarder_conn, token).await {
                        warn!(error = %e, "D-Bus signal forwarding stopped");
                    }
                });
                Some(connection)
            }
            Err(IpcError::DBus(zbus::Error::NameTaken)) => {
                error!(
                    "Another instance of trektrackd is already running (D-Bus name {} is taken)",
                    DBUS_NAME
                );
                anyhow::bail!("Another instance of trektrackd is already running");
            }
            Err(e) => {
                warn!(error = %e, "D-Bus unavailable, serving the in-process channel only");
                None
            }
        };

        tasks.spawn(deferred.run(engine.clone(), tasks.clone(), shutdown.clone()));
        tasks.spawn(retention_sweeper(
            engine.clone(),
            Duration::from_secs(config.sync.retention_sweep_interval_secs),
            shutdown.clone(),
        ));

        info!("trektrackd ready");
        shutdown.cancelled().await;

        info!("Shutting down");
        tasks.close();
        engine.shutdown().await;
        tasks.wait().await;
        if let Some(pool) = db_pool {
            pool.close().await;
        }
        Ok(())
    }
}

// ============================================================================
// Startup helpers
// ============================================================================

/// Opens the configured durable store
async fn open_store(config: &Config) -> Result<(Option<DatabasePool>, Arc<dyn IDurableStore>)> {
    let database = &config.storage.database;
    if database.as_os_str() == IN_MEMORY_DATABASE {
        warn!("Metadata cache is in memory; nothing survives a restart");
        let store: Arc<dyn IDurableStore> = Arc::new(InMemoryStore::new());
        return Ok((None, store));
    }
    let pool = DatabasePool::open(&config.storage)
        .await
        .context("Failed to open database")?;
    let store: Arc<dyn IDurableStore> = Arc::new(SqliteKeyValueStore::new(pool.pool().clone()));
    Ok((Some(pool), store))
}

/// Rejects configurations that would misbehave at runtime
fn check_config(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    for e in &errors {
        error!(field = %e.field, "{}", e.message);
    }
    let summary: Vec<String> = errors.iter().map(ToString::to_string).collect();
    anyhow::bail!("Invalid configuration: {}", summary.join("; "))
}

/// `RUST_LOG` wins over the configured level
fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

fn init_tracing(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(logging))
        .with_target(true);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);
    init_tracing(&config.logging);

    info!(config_path = %config_path.display(), "trektrack daemon starting (trektrackd)");
    check_config(&config)?;

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown_token.clone()));

    let service = DaemonService::new(config, shutdown_token).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("trektrack daemon shut down gracefully"),
        Err(e) => error!(error = %e, "trektrack daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
