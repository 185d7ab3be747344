//! Background-execution capability snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::strategy::FallbackStrategy;

/// What the detector learned about the host environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    /// A background host is registered with the engine
    pub has_registration: bool,
    /// The host supports deferred execution at all
    pub supports_deferred: bool,
    /// Whether deferred execution is enabled; `None` when it could not be queried
    pub deferred_enabled: Option<bool>,
    /// Strategy forced through configuration, if any
    pub forced_strategy: Option<FallbackStrategy>,
}

/// Result of a capability detection pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    /// Native deferred execution can be used
    pub is_available: bool,
    /// Human-readable explanation of the decision
    pub reason: String,
    /// Strategy to use when deferred execution is not available
    pub fallback_strategy: FallbackStrategy,
    /// Raw facts behind the decision
    pub environment_info: EnvironmentInfo,
    /// When the detection ran
    pub detected_at: DateTime<Utc>,
}

impl CapabilitySnapshot {
    /// Creates an "available" snapshot
    pub fn available(environment_info: EnvironmentInfo) -> Self {
        Self {
            is_available: true,
            reason: "Deferred background execution is available".to_string(),
            fallback_strategy: FallbackStrategy::Immediate,
            environment_info,
            detected_at: Utc::now(),
        }
    }

    /// Creates an "unavailable" snapshot with the given fallback
    pub fn unavailable(
        reason: impl Into<String>,
        fallback_strategy: FallbackStrategy,
        environment_info: EnvironmentInfo,
    ) -> Self {
        Self {
            is_available: false,
            reason: reason.into(),
            fallback_strategy,
            environment_info,
            detected_at: Utc::now(),
        }
    }

    /// Returns true if both snapshots reach the same decision
    ///
    /// Detection time and the human-readable reason are ignored.
    pub fn same_decision(&self, other: &Self) -> bool {
        self.is_available == other.is_available
            && self.fallback_strategy == other.fallback_strategy
            && self.environment_info == other.environment_info
    }
}
