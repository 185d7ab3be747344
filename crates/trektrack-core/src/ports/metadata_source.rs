//! Metadata source port (driven/secondary port)
//!
//! This module defines the interface the batch scheduler uses to fetch fresh
//! per-episode metadata. The primary implementation is an HTTP client that
//! talks to several JSON sources, but tests substitute scripted fetchers.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because fetch errors are adapter-specific.
//! - `prepare_batch` is an optional warm-up called once per sub-batch before
//!   any entity is fetched. A failure there fails the whole sub-batch.

use crate::domain::{EntityId, MetadataRecord, SourceId};

/// Port trait for fetching metadata from external sources
#[async_trait::async_trait]
pub trait IMetadataFetcher: Send + Sync {
    /// Fetches and combines metadata for one entity
    ///
    /// # Arguments
    /// * `entity_id` - The entity to enrich
    /// * `sources` - Sources to consult, in precedence order
    ///
    /// # Returns
    /// A record whose `_source` is the first contributing source
    async fn enrich_entity(
        &self,
        entity_id: &EntityId,
        sources: &[SourceId],
    ) -> anyhow::Result<MetadataRecord>;

    /// Warms up a source before a sub-batch is processed
    ///
    /// The default implementation does nothing.
    async fn prepare_batch(
        &self,
        _source: &SourceId,
        _entity_ids: &[EntityId],
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
