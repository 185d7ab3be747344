//! Source priority ordering
//!
//! Ranks metadata sources for the `merge-with-priority` strategy. The list is
//! ordered from most to least trusted; sources that are not listed rank below
//! every listed source.

use tracing::{debug, warn};

use trektrack_core::domain::SourceId;

/// Ordered list of trusted sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePriority {
    order: Vec<SourceId>,
}

impl SourcePriority {
    /// Creates a priority list from source names
    ///
    /// Invalid or duplicate names are logged and skipped.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let mut order: Vec<SourceId> = Vec::with_capacity(names.len());
        for name in names {
            match SourceId::new(name.as_ref()) {
                Ok(id) if order.contains(&id) => {
                    warn!(source = %id, "Skipping duplicate source priority entry");
                }
                Ok(id) => order.push(id),
                Err(e) => {
                    warn!(source = %name.as_ref(), error = %e, "Skipping invalid source priority entry");
                }
            }
        }
        debug!(sources = order.len(), "Source priority initialized");
        Self { order }
    }

    /// Rank of a source; `0` is the most trusted
    ///
    /// Unknown and missing sources share the lowest rank.
    pub fn rank(&self, source: Option<&SourceId>) -> usize {
        source
            .and_then(|s| self.order.iter().position(|o| o == s))
            .unwrap_or(self.order.len())
    }

    /// True if `candidate` strictly outranks `incumbent`
    pub fn outranks(&self, candidate: Option<&SourceId>, incumbent: Option<&SourceId>) -> bool {
        self.rank(candidate) < self.rank(incumbent)
    }

    /// Listed sources from most to least trusted
    pub fn order(&self) -> &[SourceId] {
        &self.order
    }
}

impl Default for SourcePriority {
    /// `tmdb > trakt > memory-alpha > manual`
    fn default() -> Self {
        Self::new(&["tmdb", "trakt", "memory-alpha", "manual"])
    }
}
