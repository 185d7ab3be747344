//! Batch partitioning and pacing bookkeeping
//!
//! Entities are grouped by the source they will be fetched from, then each
//! group is cut into sub-batches of that source's maximum batch size.
//!
//! Routing uses explicit per-entity affinity when the request carries one.
//! Entities without a usable affinity fall back to round-robin by index,
//! which is a placeholder for real capability-based routing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use trektrack_core::domain::{EntityConflicts, EntityId, SourceId};

// ============================================================================
// Partitioning
// ============================================================================

/// Entities routed to one source, in request order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
    pub source: SourceId,
    pub entity_ids: Vec<EntityId>,
}

/// Groups entities by source
///
/// Groups come out in the order of `sources`; empty groups are omitted.
/// Returns nothing if `sources` is empty.
pub fn partition_by_source(
    entity_ids: &[EntityId],
    sources: &[SourceId],
    affinity: Option<&HashMap<EntityId, SourceId>>,
) -> Vec<SourceGroup> {
    if sources.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<Vec<EntityId>> = vec![Vec::new(); sources.len()];
    let mut round_robin = 0usize;
    for (index, entity_id) in entity_ids.iter().enumerate() {
        let routed = affinity
            .and_then(|map| map.get(entity_id))
            .and_then(|preferred| sources.iter().position(|s| s == preferred));
        let slot = match routed {
            Some(slot) => slot,
            None => {
                round_robin += 1;
                index % sources.len()
            }
        };
        groups[slot].push(entity_id.clone());
    }
    if round_robin > 0 && sources.len() > 1 {
        debug!(
            entities = round_robin,
            sources = sources.len(),
            "Round-robin source routing (no affinity given)"
        );
    }

    sources
        .iter()
        .zip(groups)
        .filter(|(_, ids)| !ids.is_empty())
        .map(|(source, entity_ids)| SourceGroup {
            source: source.clone(),
            entity_ids,
        })
        .collect()
}

/// Splits ids into consecutive sub-batches of at most `size` (minimum 1)
pub fn sub_batches(entity_ids: &[EntityId], size: usize) -> Vec<Vec<EntityId>> {
    entity_ids
        .chunks(size.max(1))
        .map(<[EntityId]>::to_vec)
        .collect()
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of one entity inside a sub-batch
#[derive(Debug, Clone, PartialEq)]
pub enum EntityOutcome {
    /// Merged and persisted, with any conflicts found
    Completed(EntityConflicts),
    /// Fetch, merge or persist failed
    Failed(String),
    /// Entity was locked; the job now waits in the pending queue
    Queued,
}

/// Aggregate result of `process_batch`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub completed: Vec<EntityId>,
    pub failed: Vec<(EntityId, String)>,
    pub queued: Vec<EntityId>,
    /// Entities skipped because their source failed preparation; only
    /// collected for operations that retry
    pub unavailable: Vec<(EntityId, String)>,
    pub conflicts: Vec<EntityConflicts>,
    /// Processing stopped early because cancellation was observed
    pub cancelled: bool,
}

impl BatchOutcome {
    /// Folds one entity's outcome in
    pub fn record(&mut self, entity_id: EntityId, outcome: EntityOutcome) {
        match outcome {
            EntityOutcome::Completed(conflicts) => {
                if !conflicts.fields.is_empty() {
                    self.conflicts.push(conflicts);
                }
                self.completed.push(entity_id);
            }
            EntityOutcome::Failed(message) => self.failed.push((entity_id, message)),
            EntityOutcome::Queued => self.queued.push(entity_id),
        }
    }

    /// Entities accounted for so far
    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len() + self.queued.len()
    }
}

// ============================================================================
// RateWindow
// ============================================================================

/// Pacing applied to one source during this process lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWindow {
    /// Sub-batches dispatched
    pub sub_batches: u64,
    /// Pauses taken between sub-batches
    pub pauses: u64,
    /// Total time spent pausing
    #[serde(with = "duration_ms")]
    pub total_delay: Duration,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Rate windows keyed by source
#[derive(Debug, Default)]
pub struct RateWindows {
    windows: Mutex<HashMap<SourceId, RateWindow>>,
}

impl RateWindows {
    fn lock(&self) -> MutexGuard<'_, HashMap<SourceId, RateWindow>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts a dispatched sub-batch
    pub fn record_batch(&self, source: &SourceId) {
        self.lock().entry(source.clone()).or_default().sub_batches += 1;
    }

    /// Counts a pause between sub-batches
    pub fn record_delay(&self, source: &SourceId, delay: Duration) {
        let mut windows = self.lock();
        let window = windows.entry(source.clone()).or_default();
        window.pauses += 1;
        window.total_delay += delay;
    }

    pub fn get(&self, source: &SourceId) -> Option<RateWindow> {
        self.lock().get(source).cloned()
    }
}
