//! Operation progress tracking
//!
//! [`ProgressTracker`] owns the live [`Operation`] snapshots. State changes
//! happen under a short mutex; side effects (persisting to `progress/{id}`,
//! broadcasting, notifying) run afterwards through [`ProgressObserver`]s.
//!
//! Terminal operations stay readable for a retention window and are then
//! evicted through an explicit [`RetentionQueue`]. Evicted snapshots remain
//! available from the durable store.
//!
//! While the scheduler is processing an operation it is marked active (see
//! [`ProgressTracker::begin_run`]). Cancelling an active operation flips its
//! status at once, but retention and the terminal notification wait until
//! the scheduler closes it with the final counters.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use trektrack_cache::MetadataCache;
use trektrack_core::{
    domain::{DomainError, EntityConflicts, Operation, OperationId, OperationStatus},
    ports::{INotificationService, Notification},
};

use crate::{
    events::{EventBus, SyncEvent},
    metrics::SyncMetrics,
    SyncError,
};

// ============================================================================
// RetentionQueue
// ============================================================================

/// Expiry queue for terminal operations
///
/// Deadlines are computed from the instant passed in, so eviction can be
/// tested without timers.
#[derive(Debug)]
pub struct RetentionQueue {
    retention: Duration,
    deadlines: HashMap<OperationId, Instant>,
    order: VecDeque<(Instant, OperationId)>,
}

impl RetentionQueue {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            deadlines: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Schedules (or reschedules) eviction `retention` after `now`
    pub fn schedule(&mut self, id: OperationId, now: Instant) {
        let deadline = now + self.retention;
        self.deadlines.insert(id.clone(), deadline);
        self.order.push_back((deadline, id));
    }

    /// Pops every id whose current deadline is at or before `now`
    pub fn expire(&mut self, now: Instant) -> Vec<OperationId> {
        let mut expired = Vec::new();
        while let Some((deadline, _)) = self.order.front() {
            if *deadline > now {
                break;
            }
            let Some((deadline, id)) = self.order.pop_front() else {
                break;
            };
            // Superseded entries from a reschedule are skipped.
            if self.deadlines.get(&id) == Some(&deadline) {
                self.deadlines.remove(&id);
                expired.push(id);
            }
        }
        expired
    }

    /// Operations waiting for eviction
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

// ============================================================================
// Observers
// ============================================================================

/// Side effects of operation state changes
#[async_trait::async_trait]
pub trait ProgressObserver: Send + Sync {
    /// Called after every change, terminal ones included
    async fn on_update(&self, _operation: &Operation) {}

    /// Called once per operation, on its first terminal status
    async fn on_terminal(&self, _operation: &Operation) {}
}

/// Broadcasts `progress-update` events
pub struct EventObserver {
    events: EventBus,
}

impl EventObserver {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

#[async_trait::async_trait]
impl ProgressObserver for EventObserver {
    async fn on_update(&self, operation: &Operation) {
        self.events.publish(SyncEvent::ProgressUpdate {
            operation: operation.clone(),
        });
    }
}

/// Sends one summary notification per finished operation
pub struct NotificationObserver {
    service: Arc<dyn INotificationService>,
}

impl NotificationObserver {
    pub fn new(service: Arc<dyn INotificationService>) -> Self {
        Self { service }
    }

    /// Builds the summary for a terminal operation
    pub fn summary(operation: &Operation) -> Notification {
        let mut body = format!(
            "{} completed, {} failed",
            operation.completed_jobs(),
            operation.failed_jobs()
        );
        if operation.cancelled_jobs() > 0 {
            body.push_str(&format!(", {} cancelled", operation.cancelled_jobs()));
        }
        if operation.queued_jobs() > 0 {
            body.push_str(&format!(", {} queued", operation.queued_jobs()));
        }
        match operation.status() {
            OperationStatus::Failed => Notification::error("Metadata sync failed", body),
            OperationStatus::Cancelled => Notification::sync("Metadata sync cancelled", body),
            OperationStatus::Queued => Notification::sync("Metadata sync queued", body),
            _ => Notification::sync("Metadata sync complete", body),
        }
    }
}

#[async_trait::async_trait]
impl ProgressObserver for NotificationObserver {
    async fn on_terminal(&self, operation: &Operation) {
        let notification = Self::summary(operation);
        if let Err(e) = self.service.notify(&notification).await {
            warn!(operation_id = %operation.id(), error = %e, "Failed to send notification");
        }
    }
}

/// Counts finished operations by status
pub struct MetricsObserver {
    metrics: Arc<SyncMetrics>,
}

impl MetricsObserver {
    pub fn new(metrics: Arc<SyncMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait::async_trait]
impl ProgressObserver for MetricsObserver {
    async fn on_terminal(&self, operation: &Operation) {
        self.metrics.record_operation(operation.status().as_str());
    }
}

// ============================================================================
// ProgressTracker
// ============================================================================

#[derive(Debug)]
struct TrackerState {
    operations: HashMap<OperationId, Operation>,
    latest: Option<OperationId>,
    retention: RetentionQueue,
    /// Operations the scheduler is processing right now
    active: HashSet<OperationId>,
}

/// What a state change produced, published after the lock is dropped
struct Change {
    operation: Operation,
    first_terminal: bool,
}

/// Live operation snapshots and their lifecycle
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
    cache: MetadataCache,
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl ProgressTracker {
    pub fn new(
        cache: MetadataCache,
        retention: Duration,
        observers: Vec<Arc<dyn ProgressObserver>>,
    ) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                operations: HashMap::new(),
                latest: None,
                retention: RetentionQueue::new(retention),
                active: HashSet::new(),
            }),
            cache,
            observers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persists the snapshot and runs the observers
    async fn publish(&self, change: Change) -> Operation {
        if let Err(e) = self.cache.put_progress(&change.operation).await {
            warn!(operation_id = %change.operation.id(), error = %e, "Failed to persist progress");
        }
        for observer in &self.observers {
            observer.on_update(&change.operation).await;
        }
        if change.first_terminal {
            for observer in &self.observers {
                observer.on_terminal(&change.operation).await;
            }
        }
        change.operation
    }

    /// `now + remaining × average elapsed per processed job`
    fn refresh_estimate(operation: &mut Operation) {
        let processed = operation.processed_jobs();
        let remaining = operation.remaining_jobs();
        if operation.is_terminal() || processed == 0 || remaining == 0 {
            operation.set_estimated_completion(None);
            return;
        }
        let now = Utc::now();
        let per_job = (now - operation.started_at()) / processed as i32;
        operation.set_estimated_completion(Some(now + per_job * remaining as i32));
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Registers a new running operation
    pub async fn start(&self, operation: Operation) -> Operation {
        {
            let mut state = self.lock();
            state.latest = Some(operation.id().clone());
            state
                .operations
                .insert(operation.id().clone(), operation.clone());
        }
        info!(
            operation_id = %operation.id(),
            kind = %operation.kind(),
            total_jobs = operation.total_jobs(),
            "Operation started"
        );
        self.publish(Change {
            operation,
            first_terminal: false,
        })
        .await
    }

    /// Applies `f` to a live operation and publishes the result
    pub async fn update<F>(&self, id: &OperationId, f: F) -> Result<Operation, SyncError>
    where
        F: FnOnce(&mut Operation) -> Result<(), DomainError>,
    {
        let operation = {
            let mut state = self.lock();
            let operation = state
                .operations
                .get_mut(id)
                .ok_or_else(|| SyncError::OperationNotFound(id.to_string()))?;
            f(operation)?;
            Self::refresh_estimate(operation);
            operation.clone()
        };
        Ok(self
            .publish(Change {
                operation,
                first_terminal: false,
            })
            .await)
    }

    /// Re-publishes an operation's current snapshot
    pub async fn update_progress(&self, id: &OperationId) -> Result<Operation, SyncError> {
        self.update(id, |_| Ok(())).await
    }

    /// Closes an operation with the status implied by its counters
    ///
    /// If cancellation was requested, every remaining job is accounted as
    /// cancelled first. An operation cancelled eagerly during its run keeps
    /// its status; it is closed here, with the final counters.
    pub async fn finish(&self, id: &OperationId) -> Result<Operation, SyncError> {
        let change = {
            let mut state = self.lock();
            let was_active = state.active.remove(id);
            let operation = state
                .operations
                .get_mut(id)
                .ok_or_else(|| SyncError::OperationNotFound(id.to_string()))?;
            if operation.is_cancelled() {
                operation.cancel_remaining();
            }
            let first_terminal = was_active || !operation.is_terminal();
            if !operation.is_terminal() {
                operation.transition_to(operation.final_status())?;
            }
            let operation = operation.clone();
            if first_terminal {
                state.retention.schedule(id.clone(), Instant::now());
            }
            Change {
                operation,
                first_terminal,
            }
        };
        info!(
            operation_id = %id,
            status = %change.operation.status(),
            completed = change.operation.completed_jobs(),
            failed = change.operation.failed_jobs(),
            cancelled = change.operation.cancelled_jobs(),
            queued = change.operation.queued_jobs(),
            "Operation finished"
        );
        Ok(self.publish(change).await)
    }

    /// Fails an operation after an error escaped the scheduling loop
    ///
    /// Remaining jobs are accounted as failed, or as cancelled if
    /// cancellation was requested.
    pub async fn abort(&self, id: &OperationId, reason: &str) -> Result<Operation, SyncError> {
        let change = {
            let mut state = self.lock();
            let was_active = state.active.remove(id);
            let operation = state
                .operations
                .get_mut(id)
                .ok_or_else(|| SyncError::OperationNotFound(id.to_string()))?;
            if operation.is_cancelled() {
                operation.cancel_remaining();
            } else {
                let remaining = operation.remaining_jobs();
                operation.record_failed(remaining)?;
            }
            let first_terminal = was_active || !operation.is_terminal();
            if !operation.is_terminal() {
                operation.transition_to(OperationStatus::Failed)?;
            }
            let operation = operation.clone();
            if first_terminal {
                state.retention.schedule(id.clone(), Instant::now());
            }
            Change {
                operation,
                first_terminal,
            }
        };
        warn!(operation_id = %id, reason, "Operation aborted");
        Ok(self.publish(change).await)
    }

    /// Requests cancellation
    ///
    /// A running operation is transitioned to `cancelled` immediately. If
    /// the scheduler is processing it, the cancelled jobs are accounted at
    /// its next sub-batch boundary and the operation is closed there;
    /// otherwise it is closed here. Returns false for unknown or already
    /// finished operations.
    pub async fn cancel(&self, id: &OperationId) -> bool {
        let change = {
            let mut state = self.lock();
            let active = state.active.contains(id);
            let Some(operation) = state.operations.get_mut(id) else {
                return false;
            };
            if operation.is_terminal() {
                return false;
            }
            operation.request_cancel();
            if operation.transition_to(OperationStatus::Cancelled).is_err() {
                return false;
            }
            if !active {
                operation.cancel_remaining();
            }
            let operation = operation.clone();
            if !active {
                state.retention.schedule(id.clone(), Instant::now());
            }
            Change {
                operation,
                first_terminal: !active,
            }
        };
        info!(operation_id = %id, active = !change.first_terminal, "Operation cancelled");
        self.publish(change).await;
        true
    }

    /// Marks an operation as being processed by the scheduler
    ///
    /// Returns false, leaving it unmarked, unless it is still running. The
    /// mark is cleared by [`ProgressTracker::finish`],
    /// [`ProgressTracker::abort`] or [`ProgressTracker::suspend`].
    pub fn begin_run(&self, id: &OperationId) -> bool {
        let mut state = self.lock();
        let running = state
            .operations
            .get(id)
            .map_or(false, |op| op.status() == OperationStatus::Running);
        if running {
            state.active.insert(id.clone());
        }
        running
    }

    /// Ends a run that stopped before finishing, so it can be retried
    ///
    /// An operation cancelled during the run is closed here.
    pub async fn suspend(&self, id: &OperationId) {
        let change = {
            let mut state = self.lock();
            if !state.active.remove(id) {
                return;
            }
            let Some(operation) = state.operations.get_mut(id) else {
                return;
            };
            if !operation.is_terminal() {
                return;
            }
            operation.cancel_remaining();
            let operation = operation.clone();
            state.retention.schedule(id.clone(), Instant::now());
            Change {
                operation,
                first_terminal: true,
            }
        };
        info!(operation_id = %id, "Cancelled operation closed after an interrupted run");
        self.publish(change).await;
    }

    /// Operations the scheduler is processing
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Settles a job that was queued and later drained
    ///
    /// `outcome` is `Ok(conflicts)` on success or `Err(message)` on failure.
    /// A single-entity operation parked in `queued` moves to `completed` or
    /// `failed` once its last queued job settles. Evicted operations are
    /// updated in the durable store only.
    pub async fn settle_drained(
        &self,
        id: &OperationId,
        outcome: Result<EntityConflicts, String>,
    ) -> Result<Operation, SyncError> {
        let apply = |operation: &mut Operation| -> Result<(), DomainError> {
            operation.settle_queued(outcome.is_ok())?;
            if let Ok(conflicts) = &outcome {
                operation.add_conflicts(conflicts.entity_id.clone(), conflicts.fields.clone());
            }
            if operation.status() == OperationStatus::Queued && operation.queued_jobs() == 0 {
                operation.transition_to(operation.final_status())?;
            }
            Ok(())
        };

        let live = {
            let mut state = self.lock();
            let active = state.active.contains(id);
            match state.operations.get_mut(id) {
                Some(operation) => {
                    apply(operation)?;
                    let operation = operation.clone();
                    if operation.is_terminal() && !active {
                        state.retention.schedule(id.clone(), Instant::now());
                    }
                    Some(operation)
                }
                None => None,
            }
        };

        let operation = match live {
            Some(operation) => operation,
            None => {
                let mut operation = self
                    .cache
                    .get_progress(id)
                    .await?
                    .ok_or_else(|| SyncError::OperationNotFound(id.to_string()))?;
                apply(&mut operation)?;
                operation
            }
        };
        debug!(operation_id = %id, status = %operation.status(), "Drained job settled");
        Ok(self
            .publish(Change {
                operation,
                first_terminal: false,
            })
            .await)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Live snapshot, without touching the durable store
    pub fn snapshot(&self, id: &OperationId) -> Option<Operation> {
        self.lock().operations.get(id).cloned()
    }

    /// True once cancellation was requested
    pub fn is_cancel_requested(&self, id: &OperationId) -> bool {
        self.lock()
            .operations
            .get(id)
            .map_or(false, Operation::is_cancelled)
    }

    /// Snapshot of `id`, or of the most recently started operation
    ///
    /// Falls back to the persisted snapshot when the operation is no
    /// longer in memory.
    pub async fn get_progress(&self, id: Option<&OperationId>) -> Option<Operation> {
        self.sweep();
        let (wanted, live) = {
            let state = self.lock();
            let wanted = id.cloned().or_else(|| state.latest.clone())?;
            let live = state.operations.get(&wanted).cloned();
            (wanted, live)
        };
        if live.is_some() {
            return live;
        }
        match self.cache.get_progress(&wanted).await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(operation_id = %wanted, error = %e, "Failed to read persisted progress");
                None
            }
        }
    }

    /// Running operations, oldest first
    pub fn running(&self) -> Vec<Operation> {
        self.sweep();
        let mut running: Vec<Operation> = self
            .lock()
            .operations
            .values()
            .filter(|op| op.status() == OperationStatus::Running)
            .cloned()
            .collect();
        running.sort_by_key(Operation::started_at);
        running
    }

    /// Operations currently held in memory
    pub fn live_count(&self) -> usize {
        self.lock().operations.len()
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Evicts operations whose retention expired
    pub fn sweep(&self) -> Vec<OperationId> {
        self.sweep_at(Instant::now())
    }

    /// Evicts operations whose retention expired at `now`
    pub fn sweep_at(&self, now: Instant) -> Vec<OperationId> {
        let mut state = self.lock();
        let expired = state.retention.expire(now);
        for id in &expired {
            state.operations.remove(id);
        }
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Evicted finished operations");
        }
        expired
    }
}
