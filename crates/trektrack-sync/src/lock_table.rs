//! Entity lock table
//!
//! Exclusive, owner-checked locks keyed by entity id. A lock has no expiry:
//! whoever acquires it must release it on every path, including errors.
//! Acquisition failure is not an error; callers queue the work instead.
//!
//! Queueing and draining go through [`LockTable::try_acquire_or_else`] and
//! [`LockTable::release_or_hand_over`], which run their callback while the
//! entity's entry is held. A waiter is therefore either queued before the
//! holder releases or sees the lock free.

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use tracing::debug;

use trektrack_core::domain::{EntityId, OperationId};

/// Why the lock is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockKind {
    /// Fetch, merge and persist during a sync operation
    Sync,
    /// Applying a manual review decision
    Review,
    /// Cache maintenance (clear)
    Maintenance,
}

/// A held entity lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityLock {
    pub entity_id: EntityId,
    pub owner: OperationId,
    pub locked_at: DateTime<Utc>,
    pub kind: LockKind,
}

/// Result of [`LockTable::release_or_hand_over`]
#[derive(Debug, PartialEq)]
pub enum Handover<T> {
    /// The entity is unlocked
    Released,
    /// The lock now belongs to this waiter
    HandedOver(T),
}

/// Map of entity id to its current lock
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<EntityId, EntityLock>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `entity_id` for `owner` if nobody holds it
    ///
    /// Returns false, leaving the current lock untouched, if it is held.
    pub fn try_acquire(&self, entity_id: &EntityId, owner: &OperationId, kind: LockKind) -> bool {
        match self.locks.entry(entity_id.clone()) {
            Entry::Occupied(held) => {
                debug!(
                    entity_id = %entity_id,
                    owner = %held.get().owner,
                    requester = %owner,
                    "Entity already locked"
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(EntityLock {
                    entity_id: entity_id.clone(),
                    owner: owner.clone(),
                    locked_at: Utc::now(),
                    kind,
                });
                true
            }
        }
    }

    /// Locks `entity_id` for `owner`, or runs `on_busy` if it is held
    ///
    /// `on_busy` runs before the holder can release, so work it queues is
    /// seen by [`LockTable::release_or_hand_over`]. It must not touch the
    /// lock table.
    pub fn try_acquire_or_else<F>(
        &self,
        entity_id: &EntityId,
        owner: &OperationId,
        kind: LockKind,
        on_busy: F,
    ) -> bool
    where
        F: FnOnce(&EntityLock),
    {
        match self.locks.entry(entity_id.clone()) {
            Entry::Occupied(held) => {
                on_busy(held.get());
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(EntityLock {
                    entity_id: entity_id.clone(),
                    owner: owner.clone(),
                    locked_at: Utc::now(),
                    kind,
                });
                true
            }
        }
    }

    /// Releases `owner`'s lock, or passes it straight to the next waiter
    ///
    /// `next` picks the waiter while the entry is held; the lock then
    /// belongs to the operation it names without ever being free. Returns
    /// `None` if `owner` does not hold the lock.
    pub fn release_or_hand_over<T, F>(
        &self,
        entity_id: &EntityId,
        owner: &OperationId,
        next: F,
    ) -> Option<Handover<T>>
    where
        F: FnOnce() -> Option<(OperationId, T)>,
    {
        let Entry::Occupied(mut held) = self.locks.entry(entity_id.clone()) else {
            debug!(entity_id = %entity_id, owner = %owner, "Release ignored, not locked");
            return None;
        };
        if held.get().owner != *owner {
            debug!(entity_id = %entity_id, owner = %owner, "Release ignored, not the owner");
            return None;
        }
        match next() {
            Some((next_owner, waiter)) => {
                held.insert(EntityLock {
                    entity_id: entity_id.clone(),
                    owner: next_owner,
                    locked_at: Utc::now(),
                    kind: LockKind::Sync,
                });
                Some(Handover::HandedOver(waiter))
            }
            None => {
                held.remove();
                Some(Handover::Released)
            }
        }
    }

    /// Releases the lock if `owner` holds it
    ///
    /// A release by anyone else is a no-op returning false.
    pub fn release(&self, entity_id: &EntityId, owner: &OperationId) -> bool {
        let released = self
            .locks
            .remove_if(entity_id, |_, lock| lock.owner == *owner)
            .is_some();
        if !released {
            debug!(entity_id = %entity_id, owner = %owner, "Release ignored, not the owner");
        }
        released
    }

    /// Current lock of an entity
    pub fn get(&self, entity_id: &EntityId) -> Option<EntityLock> {
        self.locks.get(entity_id).map(|lock| lock.value().clone())
    }

    /// Current owner of an entity's lock
    pub fn owner(&self, entity_id: &EntityId) -> Option<OperationId> {
        self.locks.get(entity_id).map(|lock| lock.owner.clone())
    }

    pub fn is_locked(&self, entity_id: &EntityId) -> bool {
        self.locks.contains_key(entity_id)
    }

    /// Number of held locks
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
