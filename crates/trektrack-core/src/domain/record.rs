//! Cached metadata records and field-level conflicts
//!
//! A [`MetadataRecord`] is the merged, per-entity metadata document stored in
//! the durable cache under `metadata/{entity_id}`. The document is a free-form
//! JSON object (title, series, season, air date, synopsis, ...) plus a fixed
//! set of provenance fields prefixed with `_`.
//!
//! ## Serialized shape
//!
//! ```json
//! {
//!   "title": "Yesterday's Enterprise",
//!   "season": 3,
//!   "_source": "tmdb",
//!   "_enrichedAt": "2026-01-01T00:00:00Z",
//!   "_lastUpdated": "2026-01-01T00:00:01Z",
//!   "_resolvedAt": "2026-01-01T00:00:01Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::newtypes::{EntityId, SourceId};

/// Prefix reserved for provenance keys
pub const PROVENANCE_PREFIX: char = '_';

/// Returns true if a JSON value carries no information
///
/// Null, whitespace-only strings, empty arrays and empty objects are empty.
/// Numbers and booleans (including `0` and `false`) are never empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// ============================================================================
// MetadataRecord
// ============================================================================

/// Merged metadata for one entity plus provenance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Data fields; provenance keys are never stored here
    #[serde(flatten)]
    fields: Map<String, Value>,
    /// Last contributing source
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    source: Option<SourceId>,
    /// When the source data was fetched
    #[serde(
        rename = "_enrichedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    enriched_at: Option<DateTime<Utc>>,
    /// When the record was last written by a merge
    #[serde(
        rename = "_lastUpdated",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    last_updated: Option<DateTime<Utc>>,
    /// When conflict resolution last ran over this record
    #[serde(
        rename = "_resolvedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    resolved_at: Option<DateTime<Utc>>,
    /// Field disagreements preserved during merging
    #[serde(rename = "_conflicts", default, skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<FieldConflict>,
}

impl MetadataRecord {
    /// Creates an empty record attributed to `source`
    pub fn new(source: SourceId) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    /// Creates a record from a JSON object, dropping provenance-prefixed keys
    pub fn from_fields(source: SourceId, fields: Map<String, Value>) -> Self {
        let fields = fields
            .into_iter()
            .filter(|(k, _)| !k.starts_with(PROVENANCE_PREFIX))
            .collect();
        Self {
            fields,
            source: Some(source),
            ..Self::default()
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set_field(name, value);
        self
    }

    /// Builder-style enrichment timestamp setter
    pub fn with_enriched_at(mut self, at: DateTime<Utc>) -> Self {
        self.enriched_at = Some(at);
        self
    }

    /// Sets a data field; provenance-prefixed names are ignored
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if name.starts_with(PROVENANCE_PREFIX) {
            return;
        }
        self.fields.insert(name, value);
    }

    /// Returns a data field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns true if the field is absent or empty
    pub fn is_field_empty(&self, name: &str) -> bool {
        self.fields.get(name).map_or(true, is_empty_value)
    }

    /// Returns all data fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns the last contributing source
    pub fn source(&self) -> Option<&SourceId> {
        self.source.as_ref()
    }

    /// Sets the last contributing source
    pub fn set_source(&mut self, source: Option<SourceId>) {
        self.source = source;
    }

    /// Returns when the source data was fetched
    pub fn enriched_at(&self) -> Option<DateTime<Utc>> {
        self.enriched_at
    }

    /// Sets when the source data was fetched
    pub fn set_enriched_at(&mut self, at: Option<DateTime<Utc>>) {
        self.enriched_at = at;
    }

    /// Returns when the record was last merged
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Returns when conflict resolution last ran
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Stamps `_lastUpdated` and `_resolvedAt`
    pub fn stamp_resolved(&mut self, now: DateTime<Utc>) {
        self.last_updated = Some(now);
        self.resolved_at = Some(now);
    }

    /// Returns preserved field disagreements
    pub fn conflicts(&self) -> &[FieldConflict] {
        &self.conflicts
    }

    /// Replaces preserved field disagreements
    pub fn set_conflicts(&mut self, conflicts: Vec<FieldConflict>) {
        self.conflicts = conflicts;
    }
}

// ============================================================================
// FieldConflict / PendingConflicts
// ============================================================================

/// A single field on which two sources disagree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    /// Name of the disputed field
    pub field: String,
    /// Value currently cached
    pub existing_value: Value,
    /// Value offered by the fresh fetch
    pub new_value: Value,
    /// Source of the cached value
    pub existing_source: Option<SourceId>,
    /// Source of the fresh value
    pub new_source: Option<SourceId>,
    /// When the disagreement was detected
    pub detected_at: DateTime<Utc>,
}

/// Unresolved conflicts for one entity awaiting manual review
///
/// Persisted under `conflicts/{entity_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConflicts {
    /// Entity the conflicts belong to
    pub entity_id: EntityId,
    /// One entry per disputed field
    pub fields: Vec<FieldConflict>,
    /// When the set last changed
    pub updated_at: DateTime<Utc>,
}

impl PendingConflicts {
    /// Creates an empty conflict set for an entity
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            fields: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Adds conflicts, replacing any earlier entry for the same field
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = FieldConflict>) {
        for conflict in incoming {
            match self.fields.iter_mut().find(|c| c.field == conflict.field) {
                Some(existing) => *existing = conflict,
                None => self.fields.push(conflict),
            }
        }
        self.updated_at = Utc::now();
    }

    /// Removes and returns the conflict for a field
    pub fn take_field(&mut self, field: &str) -> Option<FieldConflict> {
        let idx = self.fields.iter().position(|c| c.field == field)?;
        self.updated_at = Utc::now();
        Some(self.fields.remove(idx))
    }

    /// Returns the conflict for a field
    pub fn field(&self, field: &str) -> Option<&FieldConflict> {
        self.fields.iter().find(|c| c.field == field)
    }

    /// Returns true if no conflicts remain
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
