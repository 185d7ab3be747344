//! Broadcast events emitted by the engine
//!
//! Every subscriber gets every event; slow subscribers lose the oldest
//! events (tokio broadcast semantics) rather than blocking the engine.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use trektrack_core::domain::{CapabilitySnapshot, Operation, OperationId, SourceId};

/// Default broadcast buffer
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Engine event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// Full operation snapshot after any change
    ProgressUpdate { operation: Operation },
    /// Capability decision changed
    CapabilityUpdate { capability: CapabilitySnapshot },
    /// A sub-batch finished
    #[serde(rename_all = "camelCase")]
    BatchWarmingComplete {
        operation_id: OperationId,
        source: SourceId,
        batch_index: usize,
        batch_count: usize,
        entity_count: usize,
    },
    /// The user has to trigger sync themselves (or it is disabled)
    #[serde(rename_all = "camelCase")]
    ManualSyncRequired {
        operation_id: OperationId,
        reason: String,
    },
}

impl SyncEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::ProgressUpdate { .. } => "progress-update",
            SyncEvent::CapabilityUpdate { .. } => "capability-update",
            SyncEvent::BatchWarmingComplete { .. } => "batch-warming-complete",
            SyncEvent::ManualSyncRequired { .. } => "manual-sync-required",
        }
    }
}

/// Cloneable publisher
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event; having no subscribers is fine
    pub fn publish(&self, event: SyncEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => trace!(event = name, receivers, "Event published"),
            Err(_) => trace!(event = name, "No event subscribers"),
        }
    }
}
