//! Pure merge functions for the automatic strategies
//!
//! Neither function stamps `_lastUpdated`/`_resolvedAt`; the resolver does
//! that once the strategy has run.

use chrono::{DateTime, Utc};

use trektrack_core::domain::{is_empty_value, FieldConflict, MetadataRecord};

use crate::detector::ConflictDetector;
use crate::priority::SourcePriority;

/// Overwrites `existing` with every non-empty value from `incoming`
pub fn latest_wins(existing: &MetadataRecord, incoming: &MetadataRecord) -> MetadataRecord {
    let mut merged = existing.clone();
    for (field, value) in incoming.fields() {
        if !is_empty_value(value) {
            merged.set_field(field.clone(), value.clone());
        }
    }
    if incoming.source().is_some() {
        merged.set_source(incoming.source().cloned());
    }
    if incoming.enriched_at().is_some() {
        merged.set_enriched_at(incoming.enriched_at());
    }
    merged
}

/// Merges by source priority
///
/// An incoming value replaces the existing one only when the incoming source
/// strictly outranks the record's `_source`, or when the existing value is
/// empty. Values discarded because of lower priority are returned and kept in
/// the merged record's `_conflicts`, replacing older entries for the same field.
pub fn with_priority(
    existing: &MetadataRecord,
    incoming: &MetadataRecord,
    priority: &SourcePriority,
    now: DateTime<Utc>,
) -> (MetadataRecord, Vec<FieldConflict>) {
    let incoming_outranks = priority.outranks(incoming.source(), existing.source());
    let mut merged = existing.clone();
    let mut discarded = Vec::new();

    for (field, value) in incoming.fields() {
        if is_empty_value(value) {
            continue;
        }
        if incoming_outranks || existing.is_field_empty(field) {
            merged.set_field(field.clone(), value.clone());
            continue;
        }
        if let Some(current) = existing.field(field) {
            if current != value {
                discarded.push(ConflictDetector::conflict(
                    field, current, value, existing, incoming, now,
                ));
            }
        }
    }

    if incoming_outranks {
        merged.set_source(incoming.source().cloned());
        merged.set_enriched_at(incoming.enriched_at().or(existing.enriched_at()));
    }

    if !discarded.is_empty() {
        let mut kept: Vec<FieldConflict> = existing
            .conflicts()
            .iter()
            .filter(|c| !discarded.iter().any(|d| d.field == c.field))
            .cloned()
            .collect();
        kept.extend(discarded.iter().cloned());
        merged.set_conflicts(kept);
    }

    (merged, discarded)
}
