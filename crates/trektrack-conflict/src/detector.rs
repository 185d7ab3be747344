//! Field-level conflict detection
//!
//! Compares a cached record with a freshly fetched one and reports every field
//! on which both sides carry a value and the values differ.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use trektrack_core::domain::{FieldConflict, MetadataRecord};

/// Detects field disagreements between two records
pub struct ConflictDetector;

impl ConflictDetector {
    /// Returns the fields where both values are non-null and unequal
    ///
    /// Fields missing on either side are treated as null. The result is
    /// ordered by field name.
    pub fn detect(
        existing: &MetadataRecord,
        incoming: &MetadataRecord,
        detected_at: DateTime<Utc>,
    ) -> Vec<FieldConflict> {
        let conflicts: Vec<FieldConflict> = incoming
            .fields()
            .iter()
            .filter_map(|(field, new_value)| {
                let existing_value = existing.field(field)?;
                if existing_value.is_null() || new_value.is_null() || existing_value == new_value
                {
                    return None;
                }
                Some(Self::conflict(
                    field,
                    existing_value,
                    new_value,
                    existing,
                    incoming,
                    detected_at,
                ))
            })
            .collect();

        if !conflicts.is_empty() {
            debug!(
                fields = conflicts.len(),
                existing_source = ?existing.source().map(|s| s.as_str()),
                new_source = ?incoming.source().map(|s| s.as_str()),
                "Field conflicts detected"
            );
        }
        conflicts
    }

    /// Builds a conflict entry tagged with both records' sources
    pub fn conflict(
        field: &str,
        existing_value: &Value,
        new_value: &Value,
        existing: &MetadataRecord,
        incoming: &MetadataRecord,
        detected_at: DateTime<Utc>,
    ) -> FieldConflict {
        FieldConflict {
            field: field.to_string(),
            existing_value: existing_value.clone(),
            new_value: new_value.clone(),
            existing_source: existing.source().cloned(),
            new_source: incoming.source().cloned(),
            detected_at,
        }
    }
}
