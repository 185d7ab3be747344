//! Per-entity queue of jobs waiting for a lock
//!
//! Entries are kept in descending priority order and FIFO by `queued_at`
//! among equal priorities. A job whose source set is already queued for the
//! same entity is dropped. Empty per-entity queues are removed.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use trektrack_core::domain::{ConflictStrategy, EntityId, OperationId, Priority, SourceId};

/// A unit of work deferred because its entity was locked
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingJob {
    pub operation_id: OperationId,
    pub entity_id: EntityId,
    pub sources: Vec<SourceId>,
    pub priority: Priority,
    pub strategy: ConflictStrategy,
    pub queued_at: DateTime<Utc>,
}

impl PendingJob {
    fn source_set(&self) -> BTreeSet<&SourceId> {
        self.sources.iter().collect()
    }

    /// True if `self` is served before `other`
    fn runs_before(&self, other: &PendingJob) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.queued_at < other.queued_at)
    }
}

/// Pending jobs grouped by entity
#[derive(Debug, Default)]
pub struct PendingQueue {
    queues: Mutex<HashMap<EntityId, VecDeque<PendingJob>>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, VecDeque<PendingJob>>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues a job; returns false if an equivalent job is already waiting
    pub fn enqueue(&self, job: PendingJob) -> bool {
        let mut queues = self.lock();
        let queue = queues.entry(job.entity_id.clone()).or_default();

        let sources = job.source_set();
        if queue.iter().any(|queued| queued.source_set() == sources) {
            debug!(
                entity_id = %job.entity_id,
                operation_id = %job.operation_id,
                "Equivalent job already queued, dropping"
            );
            return false;
        }

        let position = queue
            .iter()
            .position(|queued| job.runs_before(queued))
            .unwrap_or(queue.len());
        debug!(
            entity_id = %job.entity_id,
            operation_id = %job.operation_id,
            priority = %job.priority,
            position,
            "Job queued"
        );
        queue.insert(position, job);
        true
    }

    /// Pops the next job for an entity
    pub fn drain_next(&self, entity_id: &EntityId) -> Option<PendingJob> {
        let mut queues = self.lock();
        let queue = queues.get_mut(entity_id)?;
        let job = queue.pop_front();
        if queue.is_empty() {
            queues.remove(entity_id);
        }
        job
    }

    /// Jobs waiting for one entity
    pub fn len_for(&self, entity_id: &EntityId) -> usize {
        self.lock().get(entity_id).map_or(0, VecDeque::len)
    }

    /// Entities with at least one waiting job
    pub fn entity_count(&self) -> usize {
        self.lock().len()
    }

    /// Total waiting jobs
    pub fn len(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of an entity's queue in service order
    pub fn snapshot(&self, entity_id: &EntityId) -> Vec<PendingJob> {
        self.lock()
            .get(entity_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}
