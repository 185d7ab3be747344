//! Batch scheduler - drives entity jobs through lock, fetch, merge and persist
//!
//! [`BatchScheduler`] is the shared core every operation runs through. It
//! owns the lock table, the pending queue and the per-source pacing state,
//! and it is the only place where cached records are written during sync.
//!
//! ## Flow
//!
//! ```text
//! entity ids ──→ partition by source ──→ sub-batches (max size per source)
//!                                              │
//!         ┌────────────────────────────────────┘
//!         ▼
//!   try_acquire_or_else ──busy──→ PendingQueue (queued)
//!         │
//!   prepare_batch ──err──→ release all (failed)
//!         │
//!   per entity, concurrently:
//!     read cached → enrich → resolve → persist → release + drain
//! ```
//!
//! Releasing a lock pops the next pending job for that entity and runs it on
//! a task tracked by the scheduler's [`TaskTracker`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::time::Instant;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use trektrack_cache::MetadataCache;
use trektrack_conflict::ConflictResolver;
use trektrack_core::{
    config::Config,
    domain::{
        ConflictStrategy, EntityConflicts, EntityId, FieldConflict, Operation, OperationId,
        Priority, SourceId,
    },
    ports::IMetadataFetcher,
};

use crate::{
    batch::{partition_by_source, sub_batches, BatchOutcome, EntityOutcome, RateWindow, RateWindows},
    events::{EventBus, SyncEvent},
    lock_table::{Handover, LockKind, LockTable},
    metrics::SyncMetrics,
    pending_queue::{PendingJob, PendingQueue},
    progress::ProgressTracker,
    SyncError,
};

// ============================================================================
// OperationDetails
// ============================================================================

/// How the entities of one operation are fetched and merged
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDetails {
    /// Sources in precedence order
    pub sources: Vec<SourceId>,
    pub priority: Priority,
    pub strategy: ConflictStrategy,
    /// Explicit entity → source routing
    pub affinity: Option<HashMap<EntityId, SourceId>>,
}

impl OperationDetails {
    /// Details of an operation with no routing override
    pub fn for_operation(operation: &Operation, strategy: ConflictStrategy) -> Self {
        Self {
            sources: operation.sources().to_vec(),
            priority: operation.priority(),
            strategy,
            affinity: None,
        }
    }
}

/// Plan of a live operation, dropped once it finishes
#[derive(Debug)]
struct OperationPlan {
    details: OperationDetails,
    /// Entities already accounted for by an earlier attempt
    attempted: HashSet<EntityId>,
    /// Leave entities of an unreachable source for the next attempt
    retry_unavailable: bool,
}

// ============================================================================
// BatchScheduler
// ============================================================================

/// Shared scheduling core
pub struct BatchScheduler {
    locks: LockTable,
    pending: PendingQueue,
    fetcher: Arc<dyn IMetadataFetcher>,
    resolver: ConflictResolver,
    cache: MetadataCache,
    tracker: ProgressTracker,
    events: EventBus,
    metrics: Arc<SyncMetrics>,
    config: Config,
    default_strategy: ConflictStrategy,
    rate_windows: RateWindows,
    plans: DashMap<OperationId, OperationPlan>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl BatchScheduler {
    pub fn new(
        fetcher: Arc<dyn IMetadataFetcher>,
        resolver: ConflictResolver,
        cache: MetadataCache,
        tracker: ProgressTracker,
        events: EventBus,
        metrics: Arc<SyncMetrics>,
        config: Config,
    ) -> Self {
        let default_strategy = ConflictStrategy::parse_lenient(&config.conflicts.default_strategy);
        Self {
            locks: LockTable::new(),
            pending: PendingQueue::new(),
            fetcher,
            resolver,
            cache,
            tracker,
            events,
            metrics,
            config,
            default_strategy,
            rate_windows: RateWindows::default(),
            plans: DashMap::new(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Merge strategy used when a request does not name one
    pub fn default_strategy(&self) -> ConflictStrategy {
        self.default_strategy
    }

    /// Pacing applied to `source` so far
    pub fn rate_window(&self, source: &SourceId) -> Option<RateWindow> {
        self.rate_windows.get(source)
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    // ========================================================================
    // Plans
    // ========================================================================

    /// Remembers how an operation's entities are to be processed
    pub fn register_plan(&self, operation_id: &OperationId, details: OperationDetails) {
        self.plans.insert(
            operation_id.clone(),
            OperationPlan {
                details,
                attempted: HashSet::new(),
                retry_unavailable: false,
            },
        );
    }

    /// Forgets the plan of an operation closed without running
    pub fn drop_plan(&self, operation_id: &OperationId) {
        self.plans.remove(operation_id);
    }

    /// Makes later attempts pick up entities whose source failed preparation
    /// instead of failing them
    pub fn retry_when_unavailable(&self, operation_id: &OperationId) {
        if let Some(mut plan) = self.plans.get_mut(operation_id) {
            plan.retry_unavailable = true;
        }
    }

    fn retries_unavailable(&self, operation_id: &OperationId) -> bool {
        self.plans
            .get(operation_id)
            .map_or(false, |plan| plan.retry_unavailable)
    }

    fn mark_attempted(&self, operation_id: &OperationId, entity_ids: &[EntityId]) {
        if let Some(mut plan) = self.plans.get_mut(operation_id) {
            plan.attempted.extend(entity_ids.iter().cloned());
        }
    }

    // ========================================================================
    // Operation runs
    // ========================================================================

    /// Runs an operation and fails it if an error escapes the batch loop
    pub async fn run_operation(self: &Arc<Self>, id: &OperationId) -> Result<Operation, SyncError> {
        match self.run_attempt(id).await {
            Ok(operation) => Ok(operation),
            Err(e @ SyncError::OperationNotFound(_)) => Err(e),
            Err(e) => {
                self.plans.remove(id);
                self.tracker.abort(id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Processes every entity of the operation not yet accounted for, then
    /// closes the operation
    ///
    /// Errors are returned without closing the operation so the caller can
    /// retry. An operation that is no longer running is returned as is.
    #[tracing::instrument(skip(self, id), fields(operation_id = %id))]
    pub async fn run_attempt(self: &Arc<Self>, id: &OperationId) -> Result<Operation, SyncError> {
        let operation = self
            .tracker
            .snapshot(id)
            .ok_or_else(|| SyncError::OperationNotFound(id.to_string()))?;

        if operation.is_terminal() || !self.tracker.begin_run(id) {
            self.plans.remove(id);
            return self
                .tracker
                .snapshot(id)
                .ok_or_else(|| SyncError::OperationNotFound(id.to_string()));
        }

        let (details, entity_ids) = {
            match self.plans.get(id) {
                Some(plan) => (
                    plan.details.clone(),
                    operation
                        .entity_ids()
                        .iter()
                        .filter(|e| !plan.attempted.contains(*e))
                        .cloned()
                        .collect::<Vec<_>>(),
                ),
                None => (
                    OperationDetails::for_operation(&operation, self.default_strategy),
                    operation.entity_ids().to_vec(),
                ),
            }
        };

        let outcome = match self.process_batch(id, &entity_ids, &details).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.tracker.suspend(id).await;
                return Err(e);
            }
        };
        if let Some((_, reason)) = outcome.unavailable.first() {
            if !outcome.cancelled {
                let reason = reason.clone();
                info!(
                    skipped = outcome.unavailable.len(),
                    "Source unavailable, leaving entities for the next attempt"
                );
                self.tracker.suspend(id).await;
                return Err(SyncError::SourceUnavailable(reason));
            }
        }
        let finished = self.tracker.finish(id).await?;
        self.plans.remove(id);
        Ok(finished)
    }

    // ========================================================================
    // process_batch
    // ========================================================================

    /// Fetches, merges and persists `entity_ids` for one operation
    ///
    /// Counters of the operation are updated after every sub-batch. When
    /// cancellation is observed before a sub-batch, the remaining jobs are
    /// accounted as cancelled and processing stops.
    #[tracing::instrument(
        skip(self, operation_id, entity_ids, details),
        fields(operation_id = %operation_id, entities = entity_ids.len())
    )]
    pub async fn process_batch(
        self: &Arc<Self>,
        operation_id: &OperationId,
        entity_ids: &[EntityId],
        details: &OperationDetails,
    ) -> Result<BatchOutcome, SyncError> {
        let mut outcome = BatchOutcome::default();
        let retry_unavailable = self.retries_unavailable(operation_id);
        let groups = partition_by_source(entity_ids, &details.sources, details.affinity.as_ref());

        'sources: for group in groups {
            let batch_size = self.config.batch_size_for(group.source.as_str());
            let delay = self.config.inter_batch_delay_for(group.source.as_str());
            let batches = sub_batches(&group.entity_ids, batch_size);
            let batch_count = batches.len();

            for (index, batch) in batches.iter().enumerate() {
                if index > 0 && !delay.is_zero() {
                    self.pause(&group.source, delay).await;
                }

                if self.shutdown.is_cancelled() {
                    self.tracker.cancel(operation_id).await;
                }
                if self.tracker.is_cancel_requested(operation_id) {
                    let cancelled = self
                        .tracker
                        .update(operation_id, |op| {
                            op.cancel_remaining();
                            Ok(())
                        })
                        .await?
                        .cancelled_jobs();
                    info!(cancelled, "Cancellation observed, stopping");
                    outcome.cancelled = true;
                    break 'sources;
                }

                self.tracker
                    .update(operation_id, |op| {
                        op.set_current_job_label(Some(format!(
                            "{} batch {}/{} ({} entities)",
                            group.source,
                            index + 1,
                            batch_count,
                            batch.len()
                        )));
                        Ok(())
                    })
                    .await?;

                self.rate_windows.record_batch(&group.source);
                let (results, unavailable) = self
                    .run_sub_batch(operation_id, &group.source, batch, details, retry_unavailable)
                    .await;
                self.account(operation_id, details.strategy, &results).await?;
                let attempted: Vec<EntityId> = results.iter().map(|(id, _)| id.clone()).collect();
                self.mark_attempted(operation_id, &attempted);
                if let Some(reason) = unavailable {
                    outcome.unavailable.extend(
                        batch
                            .iter()
                            .filter(|id| !attempted.contains(id))
                            .map(|id| (id.clone(), reason.clone())),
                    );
                }
                for (entity_id, entity_outcome) in results {
                    outcome.record(entity_id, entity_outcome);
                }

                self.events.publish(SyncEvent::BatchWarmingComplete {
                    operation_id: operation_id.clone(),
                    source: group.source.clone(),
                    batch_index: index,
                    batch_count,
                    entity_count: batch.len(),
                });
            }
        }

        debug!(
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            queued = outcome.queued.len(),
            unavailable = outcome.unavailable.len(),
            cancelled = outcome.cancelled,
            "Batch processing finished"
        );
        Ok(outcome)
    }

    async fn pause(&self, source: &SourceId, delay: Duration) {
        debug!(source = %source, delay_ms = delay.as_millis() as u64, "Pacing between sub-batches");
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        self.rate_windows.record_delay(source, delay);
    }

    /// Folds a sub-batch's results into the operation counters
    async fn account(
        &self,
        operation_id: &OperationId,
        strategy: ConflictStrategy,
        results: &[(EntityId, EntityOutcome)],
    ) -> Result<(), SyncError> {
        let mut completed = 0u32;
        let mut failed = 0u32;
        let mut queued = 0u32;
        let mut conflicts: Vec<EntityConflicts> = Vec::new();
        for (_, outcome) in results {
            match outcome {
                EntityOutcome::Completed(found) => {
                    completed += 1;
                    if !found.fields.is_empty() {
                        conflicts.push(found.clone());
                    }
                }
                EntityOutcome::Failed(_) => failed += 1,
                EntityOutcome::Queued => queued += 1,
            }
        }

        self.metrics.record_jobs("completed", completed as usize);
        self.metrics.record_jobs("failed", failed as usize);
        self.metrics.record_jobs("queued", queued as usize);
        let conflict_fields: usize = conflicts.iter().map(|c| c.fields.len()).sum();
        self.metrics.record_conflicts(strategy.as_str(), conflict_fields);

        self.tracker
            .update(operation_id, move |op| {
                op.record_completed(completed)?;
                op.record_failed(failed)?;
                op.record_queued(queued)?;
                for found in conflicts {
                    op.add_conflicts(found.entity_id, found.fields);
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    // ========================================================================
    // Sub-batch
    // ========================================================================

    /// Runs one sub-batch
    ///
    /// If preparation fails and `retry_unavailable` is set, the locked
    /// entities are released without an outcome and the failure is returned
    /// alongside the results.
    async fn run_sub_batch(
        self: &Arc<Self>,
        operation_id: &OperationId,
        source: &SourceId,
        batch: &[EntityId],
        details: &OperationDetails,
        retry_unavailable: bool,
    ) -> (Vec<(EntityId, EntityOutcome)>, Option<String>) {
        let mut results = Vec::with_capacity(batch.len());
        let mut locked = Vec::with_capacity(batch.len());

        for entity_id in batch {
            let mut queued = false;
            let acquired =
                self.locks
                    .try_acquire_or_else(entity_id, operation_id, LockKind::Sync, |_| {
                        queued = self.pending.enqueue(PendingJob {
                            operation_id: operation_id.clone(),
                            entity_id: entity_id.clone(),
                            sources: vec![source.clone()],
                            priority: details.priority,
                            strategy: details.strategy,
                            queued_at: Utc::now(),
                        });
                    });
            if acquired {
                locked.push(entity_id.clone());
                continue;
            }
            self.metrics.record_contention();
            if !queued {
                debug!(entity_id = %entity_id, "Equivalent job already waiting for this entity");
            }
            results.push((entity_id.clone(), EntityOutcome::Queued));
        }

        if locked.is_empty() {
            return (results, None);
        }

        if let Err(e) = self.fetcher.prepare_batch(source, &locked).await {
            warn!(
                source = %source,
                entities = locked.len(),
                error = %e,
                "Batch preparation failed, failing sub-batch"
            );
            let message = format!("Batch preparation failed: {e:#}");
            for entity_id in locked {
                self.release_and_drain(&entity_id, operation_id);
                if !retry_unavailable {
                    results.push((entity_id, EntityOutcome::Failed(message.clone())));
                }
            }
            return (results, retry_unavailable.then_some(message));
        }

        let sources = std::slice::from_ref(source);
        let outcomes = join_all(
            locked
                .iter()
                .map(|entity_id| self.process_locked(operation_id, entity_id, sources, details.strategy)),
        )
        .await;
        results.extend(locked.into_iter().zip(outcomes));
        (results, None)
    }

    /// Handles one entity whose lock `owner` holds, then releases it
    async fn process_locked(
        self: &Arc<Self>,
        owner: &OperationId,
        entity_id: &EntityId,
        sources: &[SourceId],
        strategy: ConflictStrategy,
    ) -> EntityOutcome {
        let started = Instant::now();
        let outcome = match self.enrich_and_merge(entity_id, sources, strategy).await {
            Ok(fields) => EntityOutcome::Completed(EntityConflicts {
                entity_id: entity_id.clone(),
                fields,
            }),
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Entity sync failed");
                EntityOutcome::Failed(format!("{e:#}"))
            }
        };
        self.metrics
            .observe_entity_duration(started.elapsed().as_secs_f64());
        self.release_and_drain(entity_id, owner);
        outcome
    }

    #[tracing::instrument(skip(self, entity_id, sources, strategy), fields(entity_id = %entity_id, strategy = %strategy))]
    async fn enrich_and_merge(
        &self,
        entity_id: &EntityId,
        sources: &[SourceId],
        strategy: ConflictStrategy,
    ) -> anyhow::Result<Vec<FieldConflict>> {
        let existing = self
            .cache
            .get_record(entity_id)
            .await
            .context("Failed to read cached record")?;
        let incoming = self.fetcher.enrich_entity(entity_id, sources).await?;
        let resolution = self
            .resolver
            .resolve(entity_id, incoming, existing, strategy)
            .await;
        if !resolution.needs_review {
            self.cache
                .put_record(entity_id, &resolution.record)
                .await
                .context("Failed to persist merged record")?;
        }
        debug!(
            conflicts = resolution.conflicts.len(),
            needs_review = resolution.needs_review,
            "Entity merged"
        );
        Ok(resolution.conflicts)
    }

    // ========================================================================
    // Draining
    // ========================================================================

    /// Releases `owner`'s lock and hands the entity to its next pending job
    ///
    /// The lock passes to the job's operation directly, so nothing can take
    /// the entity between the release and the drained job starting.
    pub fn release_and_drain(self: &Arc<Self>, entity_id: &EntityId, owner: &OperationId) {
        let handover = self.locks.release_or_hand_over(entity_id, owner, || {
            self.pending
                .drain_next(entity_id)
                .map(|job| (job.operation_id.clone(), job))
        });
        if let Some(Handover::HandedOver(job)) = handover {
            debug!(
                entity_id = %entity_id,
                operation_id = %job.operation_id,
                "Draining pending job"
            );
            let this = Arc::clone(self);
            self.tasks.spawn(async move { this.run_drained(job).await });
        }
    }

    /// Runs a drained job; its operation already holds the entity's lock
    async fn run_drained(self: Arc<Self>, job: PendingJob) {
        let mut prepared = Ok(());
        for source in &job.sources {
            if let Err(e) = self
                .fetcher
                .prepare_batch(source, std::slice::from_ref(&job.entity_id))
                .await
            {
                prepared = Err(format!("Batch preparation failed: {e:#}"));
                break;
            }
        }

        let settled = match prepared {
            Ok(()) => {
                match self
                    .process_locked(&job.operation_id, &job.entity_id, &job.sources, job.strategy)
                    .await
                {
                    EntityOutcome::Completed(conflicts) => Ok(conflicts),
                    EntityOutcome::Failed(message) => Err(message),
                    EntityOutcome::Queued => Err("entity still locked".to_string()),
                }
            }
            Err(message) => {
                self.release_and_drain(&job.entity_id, &job.operation_id);
                Err(message)
            }
        };

        match &settled {
            Ok(conflicts) => {
                self.metrics.record_jobs("completed", 1);
                self.metrics
                    .record_conflicts(job.strategy.as_str(), conflicts.fields.len());
            }
            Err(_) => self.metrics.record_jobs("failed", 1),
        }

        if let Err(e) = self.tracker.settle_drained(&job.operation_id, settled).await {
            warn!(
                operation_id = %job.operation_id,
                entity_id = %job.entity_id,
                error = %e,
                "Failed to settle drained job"
            );
        }
    }

    // ========================================================================
    // Task lifecycle
    // ========================================================================

    /// Spawns `future` on the scheduler's task tracker
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    /// Waits until every tracked background task has finished
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Stops pacing and polling, then waits for background tasks
    pub async fn shutdown(&self) {
        info!(
            tasks = self.tasks.len(),
            pending = self.pending.len(),
            "Shutting down scheduler"
        );
        self.shutdown.cancel();
        self.settle().await;
    }
}
