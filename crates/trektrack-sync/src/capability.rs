//! Background capability detection
//!
//! Decides at operation start whether the host's deferred execution can be
//! used and, if not, which fallback strategy drives the operation instead.
//! Detection never fails: any host error degrades to `manual`.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use trektrack_core::{
    config::BackgroundConfig,
    domain::{CapabilitySnapshot, EnvironmentInfo, FallbackStrategy},
    ports::IBackgroundHost,
};

use crate::events::{EventBus, SyncEvent};

/// Detects and remembers the background capability
pub struct CapabilityDetector {
    host: Option<Arc<dyn IBackgroundHost>>,
    config: BackgroundConfig,
    events: EventBus,
    last: Mutex<Option<CapabilitySnapshot>>,
}

impl CapabilityDetector {
    pub fn new(
        host: Option<Arc<dyn IBackgroundHost>>,
        config: BackgroundConfig,
        events: EventBus,
    ) -> Self {
        Self {
            host,
            config,
            events,
            last: Mutex::new(None),
        }
    }

    /// Last snapshot produced by [`detect`](Self::detect)
    pub fn last(&self) -> Option<CapabilitySnapshot> {
        self.last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Runs detection and broadcasts `capability-update` on a changed decision
    pub async fn detect(&self) -> CapabilitySnapshot {
        let snapshot = self.evaluate().await;

        let changed = {
            let mut last = self
                .last
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let changed = last
                .as_ref()
                .map_or(true, |previous| !previous.same_decision(&snapshot));
            *last = Some(snapshot.clone());
            changed
        };

        if changed {
            info!(
                available = snapshot.is_available,
                fallback = %snapshot.fallback_strategy,
                reason = %snapshot.reason,
                "Background capability changed"
            );
            self.events.publish(SyncEvent::CapabilityUpdate {
                capability: snapshot.clone(),
            });
        } else {
            debug!(fallback = %snapshot.fallback_strategy, "Background capability unchanged");
        }
        snapshot
    }

    async fn evaluate(&self) -> CapabilitySnapshot {
        let mut env = EnvironmentInfo {
            forced_strategy: self.config.force_strategy,
            ..EnvironmentInfo::default()
        };

        if let Some(forced) = self.config.force_strategy {
            return CapabilitySnapshot::unavailable(
                format!("Strategy forced by configuration: {forced}"),
                forced,
                env,
            );
        }

        let Some(host) = self.host.as_ref().filter(|h| h.has_registration()) else {
            return CapabilitySnapshot::unavailable(
                "No background host registration",
                FallbackStrategy::Manual,
                env,
            );
        };
        env.has_registration = true;

        if !host.supports_deferred_execution() {
            return CapabilitySnapshot::unavailable(
                "Host does not support deferred execution",
                FallbackStrategy::Polling,
                env,
            );
        }
        env.supports_deferred = true;

        if self.config.deferred_enabled == Some(false) {
            env.deferred_enabled = Some(false);
            warn!("Deferred execution disabled by configuration");
            return CapabilitySnapshot::unavailable(
                "Deferred execution disabled by configuration",
                FallbackStrategy::Manual,
                env,
            );
        }

        match host.deferred_execution_enabled().await {
            Ok(true) => {
                env.deferred_enabled = Some(true);
                CapabilitySnapshot::available(env)
            }
            Ok(false) => {
                env.deferred_enabled = Some(false);
                warn!("Deferred execution is disabled on the host");
                CapabilitySnapshot::unavailable(
                    "Deferred execution is disabled on the host",
                    FallbackStrategy::Manual,
                    env,
                )
            }
            Err(e) => {
                warn!(error = %e, "Failed to query deferred execution state");
                CapabilitySnapshot::unavailable(
                    format!("Capability check failed: {e}"),
                    FallbackStrategy::Manual,
                    env,
                )
            }
        }
    }
}
