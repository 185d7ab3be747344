//! Manual review workflow
//!
//! Conflicts parked by the `manual-review` strategy are listed here and
//! settled one field at a time. The caller must hold the entity's lock while
//! calling [`ConflictResolver::apply_review`]; the sync engine takes a
//! `review` lock for that purpose.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use trektrack_core::{
    domain::{EntityId, MetadataRecord, PendingConflicts},
    ports::keys,
};

use crate::{error::ConflictError, resolver::ConflictResolver};

/// Which side of a conflict the reviewer keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewChoice {
    /// Keep the cached value
    KeepExisting,
    /// Replace it with the fetched value
    TakeNew,
}

impl fmt::Display for ReviewChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewChoice::KeepExisting => write!(f, "keep-existing"),
            ReviewChoice::TakeNew => write!(f, "take-new"),
        }
    }
}

impl FromStr for ReviewChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "keep-existing" => Ok(ReviewChoice::KeepExisting),
            "take-new" => Ok(ReviewChoice::TakeNew),
            other => Err(format!(
                "invalid review choice '{other}'; valid: keep-existing, take-new"
            )),
        }
    }
}

impl ConflictResolver {
    /// Returns the pending conflicts for one entity
    pub async fn pending_conflicts(
        &self,
        entity_id: &EntityId,
    ) -> Result<Option<PendingConflicts>, ConflictError> {
        self.load(&keys::conflicts(entity_id)).await
    }

    /// Returns every entity's pending conflicts
    ///
    /// Undecodable entries are logged and skipped.
    pub async fn list_pending(&self) -> Result<Vec<PendingConflicts>, ConflictError> {
        let keys = self.store.keys_with_prefix(keys::CONFLICTS_PREFIX).await?;
        let mut pending = Vec::with_capacity(keys.len());
        for key in keys {
            match self.load::<PendingConflicts>(&key).await {
                Ok(Some(p)) if !p.is_empty() => pending.push(p),
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable conflict entry"),
            }
        }
        Ok(pending)
    }

    /// Settles one field of an entity's pending conflicts
    ///
    /// Writes the chosen value into the cached record, removes the field from
    /// the pending set and deletes the set once it is empty.
    #[tracing::instrument(skip(self), fields(entity_id = %entity_id))]
    pub async fn apply_review(
        &self,
        entity_id: &EntityId,
        field: &str,
        choice: ReviewChoice,
    ) -> Result<MetadataRecord, ConflictError> {
        let conflicts_key = keys::conflicts(entity_id);
        let not_found = || ConflictError::NotFound {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
        };

        let mut pending = self
            .load::<PendingConflicts>(&conflicts_key)
            .await?
            .ok_or_else(not_found)?;
        let conflict = pending.take_field(field).ok_or_else(not_found)?;

        let metadata_key = keys::metadata(entity_id);
        let mut record = match self.load::<MetadataRecord>(&metadata_key).await? {
            Some(record) => record,
            None => {
                let mut record = MetadataRecord::default();
                record.set_source(conflict.existing_source.clone());
                record.set_field(field, conflict.existing_value.clone());
                record
            }
        };

        let value = match choice {
            ReviewChoice::KeepExisting => conflict.existing_value,
            ReviewChoice::TakeNew => conflict.new_value,
        };
        record.set_field(field, value);
        record.stamp_resolved(Utc::now());
        self.save(&metadata_key, &record).await?;

        if pending.is_empty() {
            self.store.delete(&conflicts_key).await?;
        } else {
            self.save(&conflicts_key, &pending).await?;
        }

        info!(field = %field, choice = %choice, remaining = pending.fields.len(), "Conflict reviewed");
        Ok(record)
    }
}
