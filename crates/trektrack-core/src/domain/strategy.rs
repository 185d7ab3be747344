//! Strategy selectors
//!
//! Two small enums select behaviour at runtime:
//! - [`ConflictStrategy`] picks how a fresh record is merged into a cached one
//! - [`FallbackStrategy`] picks how an operation is executed when native
//!   deferred background execution is not usable

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// ConflictStrategy
// ============================================================================

/// Merge strategy used by the conflict resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Overwrite with every non-empty incoming value
    #[default]
    LatestWins,
    /// Overwrite only from a higher-priority source or into an empty field
    MergeWithPriority,
    /// Park disagreements for a human decision
    ManualReview,
}

impl ConflictStrategy {
    /// Parses a strategy name, falling back to `latest-wins` for unknown names
    ///
    /// Parsing never fails. Matching is case-insensitive and accepts `_` in
    /// place of `-`.
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "merge-with-priority" => Self::MergeWithPriority,
            "manual-review" => Self::ManualReview,
            _ => Self::LatestWins,
        }
    }

    /// Returns the wire name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LatestWins => "latest-wins",
            Self::MergeWithPriority => "merge-with-priority",
            Self::ManualReview => "manual-review",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_lenient(s))
    }
}

// ============================================================================
// FallbackStrategy
// ============================================================================

/// Execution path chosen for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Run the batch scheduler right away
    Immediate,
    /// Re-invoke the batch scheduler on a bounded timer
    Polling,
    /// Tell the user a manual sync is needed, then run right away
    Manual,
    /// Do no work
    Disabled,
}

impl FallbackStrategy {
    /// Returns the wire name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Polling => "polling",
            Self::Manual => "manual",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FallbackStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "polling" => Ok(Self::Polling),
            "manual" => Ok(Self::Manual),
            "disabled" => Ok(Self::Disabled),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown fallback strategy: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_strategy_parse() {
        assert_eq!(
            ConflictStrategy::parse_lenient("merge-with-priority"),
            ConflictStrategy::MergeWithPriority
        );
        assert_eq!(
            ConflictStrategy::parse_lenient("MANUAL_REVIEW"),
            ConflictStrategy::ManualReview
        );
        assert_eq!(
            ConflictStrategy::parse_lenient("latest-wins"),
            ConflictStrategy::LatestWins
        );
    }

    #[test]
    fn test_unknown_conflict_strategy_is_latest_wins() {
        let parsed: ConflictStrategy = "coin-toss".parse().unwrap();
        assert_eq!(parsed, ConflictStrategy::LatestWins);
    }

    #[test]
    fn test_conflict_strategy_serde_names() {
        let json = serde_json::to_string(&ConflictStrategy::MergeWithPriority).unwrap();
        assert_eq!(json, "\"merge-with-priority\"");
    }

    #[test]
    fn test_fallback_strategy_from_str() {
        assert_eq!(
            "Polling".parse::<FallbackStrategy>().unwrap(),
            FallbackStrategy::Polling
        );
        assert!("sometimes".parse::<FallbackStrategy>().is_err());
        assert_eq!(FallbackStrategy::Disabled.to_string(), "disabled");
    }
}
