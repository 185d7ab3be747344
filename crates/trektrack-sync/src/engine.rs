//! Sync engine - the public face of the synchronization core
//!
//! The [`SyncEngine`] is a cheap, cloneable handle over one
//! [`BatchScheduler`], one [`CapabilityDetector`] and one
//! [`FallbackDispatcher`]. Every request surface (the IPC loop, D-Bus, tests)
//! goes through it.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trektrack_cache::InMemoryStore;
//! use trektrack_core::{config::Config, domain::{EntityId, SourceId, SyncRequest}};
//! use trektrack_sources::HttpMetadataFetcher;
//! use trektrack_sync::SyncEngine;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let engine = SyncEngine::builder(
//!     Arc::new(HttpMetadataFetcher::from_config(&config)?),
//!     Arc::new(InMemoryStore::new()),
//! )
//! .config(&config)
//! .build()?;
//!
//! let response = engine
//!     .start_sync(SyncRequest::new(
//!         vec![EntityId::new("tng-s03e26")?],
//!         vec![SourceId::new("tmdb")?],
//!     ))
//!     .await?;
//! println!("started {}", response.operation_id);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use trektrack_cache::MetadataCache;
use trektrack_conflict::{ConflictError, ConflictResolver, ReviewChoice, SourcePriority};
use trektrack_core::{
    config::Config,
    domain::{
        CapabilitySnapshot, EntityId, Operation, OperationId, PendingConflicts, SyncRequest,
    },
    ports::{keys, IBackgroundHost, IDurableStore, IMetadataFetcher, INotificationService},
};

use crate::{
    capability::CapabilityDetector,
    dispatcher::FallbackDispatcher,
    events::{EventBus, SyncEvent, DEFAULT_EVENT_CAPACITY},
    lock_table::{LockKind, LockTable},
    metrics::SyncMetrics,
    pending_queue::PendingQueue,
    progress::{
        EventObserver, MetricsObserver, NotificationObserver, ProgressObserver, ProgressTracker,
    },
    scheduler::{BatchScheduler, OperationDetails},
    SyncError,
};

// ============================================================================
// Responses
// ============================================================================

/// Reply to a start request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncResponse {
    pub operation_id: OperationId,
    /// Capability decision the operation was dispatched with
    pub capability: CapabilitySnapshot,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`SyncEngine`] from its collaborators
pub struct SyncEngineBuilder {
    fetcher: Arc<dyn IMetadataFetcher>,
    store: Arc<dyn IDurableStore>,
    host: Option<Arc<dyn IBackgroundHost>>,
    notifications: Option<Arc<dyn INotificationService>>,
    config: Config,
    event_capacity: usize,
}

impl SyncEngineBuilder {
    /// Deferred-execution host; without one the engine always falls back
    pub fn background_host(mut self, host: Arc<dyn IBackgroundHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Receives one summary per finished operation
    pub fn notifications(mut self, service: Arc<dyn INotificationService>) -> Self {
        self.notifications = Some(service);
        self
    }

    pub fn config(mut self, config: &Config) -> Self {
        self.config = config.clone();
        self
    }

    /// Broadcast buffer size
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<SyncEngine, SyncError> {
        let events = EventBus::new(self.event_capacity);
        let metrics = Arc::new(SyncMetrics::new()?);
        let cache = MetadataCache::new(Arc::clone(&self.store));

        let mut observers: Vec<Arc<dyn ProgressObserver>> = vec![
            Arc::new(EventObserver::new(events.clone())),
            Arc::new(MetricsObserver::new(Arc::clone(&metrics))),
        ];
        if let Some(service) = self.notifications {
            observers.push(Arc::new(NotificationObserver::new(service)));
        }
        let tracker = ProgressTracker::new(cache.clone(), self.config.retention(), observers);

        let resolver = ConflictResolver::new(
            Arc::clone(&self.store),
            SourcePriority::new(&self.config.conflicts.source_priority),
        );

        let detector = CapabilityDetector::new(
            self.host.clone(),
            self.config.background.clone(),
            events.clone(),
        );
        let scheduler = Arc::new(BatchScheduler::new(
            self.fetcher,
            resolver,
            cache,
            tracker,
            events,
            metrics,
            self.config,
        ));
        let dispatcher = FallbackDispatcher::new(Arc::clone(&scheduler), self.host);

        Ok(SyncEngine {
            scheduler,
            detector: Arc::new(detector),
            dispatcher: Arc::new(dispatcher),
        })
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Metadata synchronization engine
///
/// ## Dependencies
///
/// - `fetcher`: Per-entity metadata from external sources
/// - `store`: Durable key/value store for records, progress and conflicts
/// - `host` (optional): Deferred background execution
/// - `notifications` (optional): One summary per finished operation
#[derive(Clone)]
pub struct SyncEngine {
    scheduler: Arc<BatchScheduler>,
    detector: Arc<CapabilityDetector>,
    dispatcher: Arc<FallbackDispatcher>,
}

impl SyncEngine {
    pub fn builder(
        fetcher: Arc<dyn IMetadataFetcher>,
        store: Arc<dyn IDurableStore>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            fetcher,
            store,
            host: None,
            notifications: None,
            config: Config::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    // ========================================================================
    // Sync operations
    // ========================================================================

    /// Accepts a sync request and dispatches it
    ///
    /// Returns as soon as the operation is registered; the work itself runs
    /// in the background (or is deferred to the host).
    #[tracing::instrument(skip(self, request), fields(entities = request.entity_ids.len()))]
    pub async fn start_sync(&self, request: SyncRequest) -> Result<StartSyncResponse, SyncError> {
        if request.entity_ids.is_empty() {
            return Err(SyncError::InvalidRequest("entityIds must not be empty".into()));
        }
        if request.sources.is_empty() {
            return Err(SyncError::InvalidRequest("sources must not be empty".into()));
        }
        if let Some(id) = &request.operation_id {
            if self.scheduler.tracker().snapshot(id).is_some() {
                return Err(SyncError::InvalidRequest(format!(
                    "operation {id} already exists"
                )));
            }
        }

        let operation = Operation::from_request(&request);
        let operation_id = operation.id().clone();
        self.scheduler.register_plan(
            &operation_id,
            OperationDetails {
                sources: request.sources,
                priority: operation.priority(),
                strategy: request
                    .conflict_strategy
                    .unwrap_or_else(|| self.scheduler.default_strategy()),
                affinity: request.affinity,
            },
        );
        self.scheduler.tracker().start(operation).await;

        let capability = self.detector.detect().await;
        let dispatch = self
            .dispatcher
            .start_with_fallback(&operation_id, &capability)
            .await?;
        info!(operation_id = %operation_id, dispatch = ?dispatch, "Sync started");

        Ok(StartSyncResponse {
            operation_id,
            capability,
        })
    }

    /// Runs an operation the host deferred earlier
    #[tracing::instrument(skip(self, operation_id), fields(operation_id = %operation_id))]
    pub async fn run_deferred(&self, operation_id: &OperationId) -> Result<Operation, SyncError> {
        self.scheduler.run_operation(operation_id).await
    }

    /// Requests cancellation; false if the operation is unknown or finished
    pub async fn cancel_sync(&self, operation_id: &OperationId) -> bool {
        self.scheduler.tracker().cancel(operation_id).await
    }

    /// Snapshot of one operation, or of the most recently started one
    pub async fn get_progress(&self, operation_id: Option<&OperationId>) -> Option<Operation> {
        self.scheduler.tracker().get_progress(operation_id).await
    }

    /// Every running operation
    pub fn get_all_progress(&self) -> Vec<Operation> {
        self.scheduler.tracker().running()
    }

    /// Re-runs capability detection
    pub async fn get_sync_capability(&self) -> CapabilitySnapshot {
        self.detector.detect().await
    }

    // ========================================================================
    // Conflicts and cache
    // ========================================================================

    /// Every entity with conflicts waiting for review
    pub async fn list_conflicts(&self) -> Result<Vec<PendingConflicts>, SyncError> {
        Ok(self.scheduler.resolver().list_pending().await?)
    }

    /// Applies a review decision for one field
    ///
    /// Returns false if no such conflict is pending. Fails with
    /// [`SyncError::EntityLocked`] while another operation holds the entity.
    #[tracing::instrument(skip(self, entity_id), fields(entity_id = %entity_id))]
    pub async fn resolve_conflict(
        &self,
        entity_id: &EntityId,
        field: &str,
        choice: ReviewChoice,
    ) -> Result<bool, SyncError> {
        let owner = OperationId::generate();
        if !self
            .scheduler
            .locks()
            .try_acquire(entity_id, &owner, LockKind::Review)
        {
            return Err(SyncError::EntityLocked(entity_id.clone()));
        }

        let result = self
            .scheduler
            .resolver()
            .apply_review(entity_id, field, choice)
            .await;
        self.scheduler.release_and_drain(entity_id, &owner);

        match result {
            Ok(_) => Ok(true),
            Err(ConflictError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes cached records and returns how many were removed
    ///
    /// Entities locked by a running operation are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn clear_cache(&self, entity_id: Option<&EntityId>) -> Result<u64, SyncError> {
        let targets = match entity_id {
            Some(id) => vec![id.clone()],
            None => {
                let store = self.scheduler.cache().store();
                let keys = store
                    .keys_with_prefix(keys::METADATA_PREFIX)
                    .await
                    .map_err(trektrack_cache::CacheError::from)?;
                keys.iter()
                    .filter_map(|key| key.strip_prefix(keys::METADATA_PREFIX))
                    .filter_map(|id| match EntityId::new(id) {
                        Ok(id) => Some(id),
                        Err(e) => {
                            warn!(key = %id, error = %e, "Skipping malformed metadata key");
                            None
                        }
                    })
                    .collect()
            }
        };

        let owner = OperationId::generate();
        let mut removed = 0;
        for id in &targets {
            if !self
                .scheduler
                .locks()
                .try_acquire(id, &owner, LockKind::Maintenance)
            {
                debug!(entity_id = %id, "Entity busy, not clearing");
                continue;
            }
            let result = self.scheduler.cache().clear(Some(id)).await;
            self.scheduler.release_and_drain(id, &owner);
            removed += result?;
        }
        info!(removed, "Cache cleared");
        Ok(removed)
    }

    // ========================================================================
    // Events, metrics, lifecycle
    // ========================================================================

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.scheduler.events().subscribe()
    }

    /// Publisher shared with every engine component
    pub fn events(&self) -> &EventBus {
        self.scheduler.events()
    }

    /// Prometheus text exposition
    pub fn metrics_text(&self) -> anyhow::Result<String> {
        self.scheduler.metrics().encode()
    }

    /// Evicts finished operations past their retention window
    pub fn sweep_retention(&self) -> Vec<OperationId> {
        self.scheduler.tracker().sweep()
    }

    pub fn locks(&self) -> &LockTable {
        self.scheduler.locks()
    }

    pub fn pending(&self) -> &PendingQueue {
        self.scheduler.pending()
    }

    pub fn scheduler(&self) -> &Arc<BatchScheduler> {
        &self.scheduler
    }

    /// Waits for every background run and drained job
    pub async fn settle(&self) {
        self.scheduler.settle().await;
    }

    /// Stops timers and waits for background work to wind down
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
