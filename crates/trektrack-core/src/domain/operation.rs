//! Sync operations and their lifecycle
//!
//! An [`Operation`] is one accepted sync request, either for a single entity
//! or for many. It carries live job counters that the batch scheduler and
//! progress tracker update while the work runs.
//!
//! ## State Machine
//!
//! ```text
//!               ┌────────────► Completed
//!               │
//!     Running ──┼────────────► Failed
//!               │
//!               ├────────────► Cancelled
//!               │
//!               └──► Queued ──► Completed | Failed   (drained later)
//! ```
//!
//! Job counters can never exceed the total:
//! `completed + failed + cancelled + queued <= total`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{EntityId, OperationId, SourceId};
use super::record::FieldConflict;
use super::strategy::{ConflictStrategy, FallbackStrategy};

// ============================================================================
// Enums
// ============================================================================

/// Whether an operation targets one entity or many
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Exactly one entity
    Single,
    /// Any number of entities
    Bulk,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Single => write!(f, "single"),
            OperationKind::Bulk => write!(f, "bulk"),
        }
    }
}

/// Lifecycle status of an operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Work in progress
    #[default]
    Running,
    /// Finished without failures
    Completed,
    /// Finished with at least one failure
    Failed,
    /// Stopped by a cancellation request
    Cancelled,
    /// The single target entity was locked; the job waits in the pending queue
    Queued,
}

impl OperationStatus {
    /// Returns true for every status except `Running`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Running)
    }

    /// Returns true if `self -> to` is a legal transition
    pub fn can_transition_to(&self, to: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, to),
            (Running, Completed | Failed | Cancelled | Queued) | (Queued, Completed | Failed)
        )
    }

    /// Returns the status name
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::Queued => "queued",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority of an operation
///
/// Ordered `Low < Normal < High < Urgent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background refresh
    Low,
    /// Default for bulk operations
    #[default]
    Normal,
    /// Default for single-entity operations
    High,
    /// User is waiting on the result
    Urgent,
}

impl Priority {
    /// Default priority for an operation kind
    pub fn default_for(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Single => Priority::High,
            OperationKind::Bulk => Priority::Normal,
        }
    }

    /// Returns the priority name
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SyncRequest
// ============================================================================

/// A caller's request to synchronize one or more entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Caller-chosen operation id; generated when absent
    #[serde(default)]
    pub operation_id: Option<OperationId>,
    /// Entities to synchronize
    pub entity_ids: Vec<EntityId>,
    /// Sources to fetch from, in precedence order
    pub sources: Vec<SourceId>,
    /// Priority override
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Explicit per-entity source routing
    #[serde(default)]
    pub affinity: Option<HashMap<EntityId, SourceId>>,
    /// Merge strategy override
    #[serde(default)]
    pub conflict_strategy: Option<ConflictStrategy>,
}

impl SyncRequest {
    /// Creates a request with no overrides
    pub fn new(entity_ids: Vec<EntityId>, sources: Vec<SourceId>) -> Self {
        Self {
            operation_id: None,
            entity_ids,
            sources,
            priority: None,
            affinity: None,
            conflict_strategy: None,
        }
    }

    /// Sets the operation id
    pub fn with_operation_id(mut self, id: OperationId) -> Self {
        self.operation_id = Some(id);
        self
    }

    /// Sets the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the affinity map
    pub fn with_affinity(mut self, affinity: HashMap<EntityId, SourceId>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    /// Sets the merge strategy
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = Some(strategy);
        self
    }

    /// Single when exactly one entity is requested, bulk otherwise
    pub fn kind(&self) -> OperationKind {
        if self.entity_ids.len() == 1 {
            OperationKind::Single
        } else {
            OperationKind::Bulk
        }
    }

    /// Effective priority after applying the kind default
    pub fn effective_priority(&self) -> Priority {
        self.priority
            .unwrap_or_else(|| Priority::default_for(self.kind()))
    }
}

// ============================================================================
// Operation
// ============================================================================

/// Field conflicts detected for one entity during an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConflicts {
    /// Entity whose merge produced the conflicts
    pub entity_id: EntityId,
    /// Disputed fields
    pub fields: Vec<FieldConflict>,
}

/// One top-level sync operation and its live counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    id: OperationId,
    kind: OperationKind,
    entity_ids: Vec<EntityId>,
    sources: Vec<SourceId>,
    priority: Priority,
    cancelled: bool,
    status: OperationStatus,
    total_jobs: u32,
    completed_jobs: u32,
    failed_jobs: u32,
    cancelled_jobs: u32,
    queued_jobs: u32,
    conflicts: Vec<EntityConflicts>,
    started_at: DateTime<Utc>,
    estimated_completion: Option<DateTime<Utc>>,
    current_job_label: Option<String>,
    finished_at: Option<DateTime<Utc>>,
    strategy: Option<FallbackStrategy>,
}

impl Operation {
    /// Creates a running operation with one job per entity
    pub fn new(
        id: OperationId,
        entity_ids: Vec<EntityId>,
        sources: Vec<SourceId>,
        priority: Priority,
    ) -> Self {
        let kind = if entity_ids.len() == 1 {
            OperationKind::Single
        } else {
            OperationKind::Bulk
        };
        let total_jobs = u32::try_from(entity_ids.len()).unwrap_or(u32::MAX);
        Self {
            id,
            kind,
            entity_ids,
            sources,
            priority,
            cancelled: false,
            status: OperationStatus::Running,
            total_jobs,
            completed_jobs: 0,
            failed_jobs: 0,
            cancelled_jobs: 0,
            queued_jobs: 0,
            conflicts: Vec::new(),
            started_at: Utc::now(),
            estimated_completion: None,
            current_job_label: None,
            finished_at: None,
            strategy: None,
        }
    }

    /// Creates a running operation from a request
    pub fn from_request(request: &SyncRequest) -> Self {
        let id = request
            .operation_id
            .clone()
            .unwrap_or_else(OperationId::generate);
        Self::new(
            id,
            request.entity_ids.clone(),
            request.sources.clone(),
            request.effective_priority(),
        )
    }

    // --- getters ------------------------------------------------------------

    /// Operation id
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Single or bulk
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Target entities
    pub fn entity_ids(&self) -> &[EntityId] {
        &self.entity_ids
    }

    /// Requested sources
    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    /// Scheduling priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// True once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Current status
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// True if the status is terminal
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Total jobs
    pub fn total_jobs(&self) -> u32 {
        self.total_jobs
    }

    /// Completed jobs
    pub fn completed_jobs(&self) -> u32 {
        self.completed_jobs
    }

    /// Failed jobs
    pub fn failed_jobs(&self) -> u32 {
        self.failed_jobs
    }

    /// Cancelled jobs
    pub fn cancelled_jobs(&self) -> u32 {
        self.cancelled_jobs
    }

    /// Queued jobs
    pub fn queued_jobs(&self) -> u32 {
        self.queued_jobs
    }

    /// Sum of every outcome counter
    pub fn processed_jobs(&self) -> u32 {
        self.completed_jobs + self.failed_jobs + self.cancelled_jobs + self.queued_jobs
    }

    /// Jobs with no outcome yet
    pub fn remaining_jobs(&self) -> u32 {
        self.total_jobs.saturating_sub(self.processed_jobs())
    }

    /// Conflicts collected so far
    pub fn conflicts(&self) -> &[EntityConflicts] {
        &self.conflicts
    }

    /// Start time
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Estimated completion time
    pub fn estimated_completion(&self) -> Option<DateTime<Utc>> {
        self.estimated_completion
    }

    /// Label of the job currently being processed
    pub fn current_job_label(&self) -> Option<&str> {
        self.current_job_label.as_deref()
    }

    /// Time of the terminal transition
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Execution strategy the operation was dispatched with
    pub fn strategy(&self) -> Option<FallbackStrategy> {
        self.strategy
    }

    // --- counters -----------------------------------------------------------

    fn add_jobs(&mut self, n: u32) -> Result<(), DomainError> {
        let processed = self.processed_jobs();
        if processed + n > self.total_jobs {
            return Err(DomainError::JobOverflow {
                processed: processed + n,
                total: self.total_jobs,
            });
        }
        Ok(())
    }

    /// Records `n` completed jobs
    pub fn record_completed(&mut self, n: u32) -> Result<(), DomainError> {
        self.add_jobs(n)?;
        self.completed_jobs += n;
        Ok(())
    }

    /// Records `n` failed jobs
    pub fn record_failed(&mut self, n: u32) -> Result<(), DomainError> {
        self.add_jobs(n)?;
        self.failed_jobs += n;
        Ok(())
    }

    /// Records `n` cancelled jobs
    pub fn record_cancelled(&mut self, n: u32) -> Result<(), DomainError> {
        self.add_jobs(n)?;
        self.cancelled_jobs += n;
        Ok(())
    }

    /// Records `n` queued jobs
    pub fn record_queued(&mut self, n: u32) -> Result<(), DomainError> {
        self.add_jobs(n)?;
        self.queued_jobs += n;
        Ok(())
    }

    /// Moves one queued job to completed or failed
    ///
    /// A failure turns an operation already closed as `completed` into
    /// `failed`, keeping its finish time.
    pub fn settle_queued(&mut self, succeeded: bool) -> Result<(), DomainError> {
        if self.queued_jobs == 0 {
            return Err(DomainError::ValidationFailed(format!(
                "Operation {} has no queued jobs",
                self.id
            )));
        }
        self.queued_jobs -= 1;
        if succeeded {
            self.completed_jobs += 1;
        } else {
            self.failed_jobs += 1;
            if self.status == OperationStatus::Completed {
                self.status = OperationStatus::Failed;
            }
        }
        Ok(())
    }

    /// Accounts every remaining job as cancelled and returns how many
    pub fn cancel_remaining(&mut self) -> u32 {
        let remaining = self.remaining_jobs();
        self.cancelled_jobs += remaining;
        remaining
    }

    // --- mutation -----------------------------------------------------------

    /// Sets the cancellation flag
    pub fn request_cancel(&mut self) {
        self.cancelled = true;
    }

    /// Moves to `to`, stamping `finished_at` on terminal statuses
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidState`] for illegal transitions
    pub fn transition_to(&mut self, to: OperationStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
            self.current_job_label = None;
            self.estimated_completion = None;
        }
        Ok(())
    }

    /// Status implied by the counters once all work has been attempted
    pub fn final_status(&self) -> OperationStatus {
        if self.cancelled {
            OperationStatus::Cancelled
        } else if self.failed_jobs > 0 {
            OperationStatus::Failed
        } else if self.kind == OperationKind::Single && self.queued_jobs > 0 {
            OperationStatus::Queued
        } else {
            OperationStatus::Completed
        }
    }

    /// Appends conflicts detected for an entity
    pub fn add_conflicts(&mut self, entity_id: EntityId, fields: Vec<FieldConflict>) {
        if fields.is_empty() {
            return;
        }
        self.conflicts.push(EntityConflicts { entity_id, fields });
    }

    /// Sets the label of the job in progress
    pub fn set_current_job_label(&mut self, label: Option<String>) {
        self.current_job_label = label;
    }

    /// Sets the estimated completion time
    pub fn set_estimated_completion(&mut self, at: Option<DateTime<Utc>>) {
        self.estimated_completion = at;
    }

    /// Records the execution strategy
    pub fn set_strategy(&mut self, strategy: FallbackStrategy) {
        self.strategy = Some(strategy);
    }

    /// Overrides the start time
    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }
}
