//! Conflict resolver
//!
//! Merges a freshly fetched record into the cached one using a selectable
//! [`ConflictStrategy`]:
//! - `latest-wins`: every non-empty incoming value wins
//! - `merge-with-priority`: incoming values win only from a more trusted source
//!   or into empty fields
//! - `manual-review`: disagreements are parked under `conflicts/{entity_id}`
//!   and the cached record is left untouched
//!
//! Resolution never fails. Any internal error degrades to the best prior
//! record. The review workflow (`pending_conflicts`, `list_pending`,
//! `apply_review`) lives in [`crate::review`].

use std::sync::Arc;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use trektrack_core::{
    domain::{ConflictStrategy, EntityId, FieldConflict, MetadataRecord, PendingConflicts},
    ports::{keys, IDurableStore},
};

use crate::{detector::ConflictDetector, error::ConflictError, merge, priority::SourcePriority};

/// Outcome of a resolve call
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Record to persist as the new cached state
    pub record: MetadataRecord,
    /// Disagreements found while merging
    pub conflicts: Vec<FieldConflict>,
    /// True if the conflicts were parked for manual review
    pub needs_review: bool,
}

impl Resolution {
    fn merged(record: MetadataRecord, conflicts: Vec<FieldConflict>) -> Self {
        Self {
            record,
            conflicts,
            needs_review: false,
        }
    }
}

/// Merges fresh metadata into cached records
pub struct ConflictResolver {
    pub(crate) store: Arc<dyn IDurableStore>,
    priority: SourcePriority,
}

impl ConflictResolver {
    /// Creates a resolver persisting review items to `store`
    pub fn new(store: Arc<dyn IDurableStore>, priority: SourcePriority) -> Self {
        Self { store, priority }
    }

    /// Source ordering used by `merge-with-priority`
    pub fn priority(&self) -> &SourcePriority {
        &self.priority
    }

    /// Merges `incoming` into `existing`
    ///
    /// Without an existing record the incoming record is returned unchanged.
    /// Otherwise the strategy runs and, unless the conflicts were parked for
    /// review, `_lastUpdated` and `_resolvedAt` are stamped with now.
    #[tracing::instrument(skip(self, incoming, existing), fields(entity_id = %entity_id, strategy = %strategy))]
    pub async fn resolve(
        &self,
        entity_id: &EntityId,
        incoming: MetadataRecord,
        existing: Option<MetadataRecord>,
        strategy: ConflictStrategy,
    ) -> Resolution {
        let Some(existing) = existing else {
            debug!("No cached record, taking incoming as-is");
            return Resolution::merged(incoming, Vec::new());
        };

        let now = Utc::now();
        match strategy {
            ConflictStrategy::LatestWins => {
                let mut record = merge::latest_wins(&existing, &incoming);
                record.stamp_resolved(now);
                Resolution::merged(record, Vec::new())
            }
            ConflictStrategy::MergeWithPriority => {
                let (mut record, discarded) =
                    merge::with_priority(&existing, &incoming, &self.priority, now);
                record.stamp_resolved(now);
                Resolution::merged(record, discarded)
            }
            ConflictStrategy::ManualReview => {
                let conflicts = ConflictDetector::detect(&existing, &incoming, now);
                if conflicts.is_empty() {
                    let mut record = merge::latest_wins(&existing, &incoming);
                    record.stamp_resolved(now);
                    return Resolution::merged(record, Vec::new());
                }

                if let Err(e) = self.park_conflicts(entity_id, conflicts.clone()).await {
                    warn!(error = %e, "Failed to persist conflicts for review, keeping cached record");
                } else {
                    info!(fields = conflicts.len(), "Conflicts parked for manual review");
                }
                Resolution {
                    record: existing,
                    conflicts,
                    needs_review: true,
                }
            }
        }
    }

    /// Adds conflicts to the entity's pending set
    async fn park_conflicts(
        &self,
        entity_id: &EntityId,
        conflicts: Vec<FieldConflict>,
    ) -> Result<(), ConflictError> {
        let key = keys::conflicts(entity_id);
        let mut pending = self
            .load::<PendingConflicts>(&key)
            .await?
            .unwrap_or_else(|| PendingConflicts::new(entity_id.clone()));
        pending.merge(conflicts);
        self.save(&key, &pending).await
    }

    pub(crate) async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ConflictError> {
        let Some(value) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| ConflictError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    pub(crate) async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConflictError> {
        let value = serde_json::to_value(value).map_err(|source| ConflictError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, &value).await?;
        Ok(())
    }
}
