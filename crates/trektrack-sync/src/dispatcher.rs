//! Fallback dispatcher
//!
//! Starts an accepted operation according to the detected capability:
//!
//! | Capability           | What happens                                         |
//! |----------------------|------------------------------------------------------|
//! | available            | registered with the host, which calls `run_deferred` |
//! | `immediate`          | runs now on a tracked task                           |
//! | `polling`            | re-invoked on a timer until terminal or out of tries |
//! |                      | (an unreachable source is retried on the next tick)  |
//! | `manual`             | `manual-sync-required` is broadcast, then runs now   |
//! | `disabled`           | `manual-sync-required` only; closed as cancelled     |

use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use trektrack_core::{
    domain::{CapabilitySnapshot, FallbackStrategy, OperationId},
    ports::IBackgroundHost,
};

use crate::{events::SyncEvent, scheduler::BatchScheduler, SyncError};

/// How an operation was actually started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the host's deferred execution
    Deferred,
    /// Driven by a fallback strategy
    Fallback(FallbackStrategy),
}

impl Dispatch {
    /// True if the host will call back to run the operation
    pub fn is_deferred(&self) -> bool {
        matches!(self, Dispatch::Deferred)
    }
}

/// Starts operations with the strategy the capability allows
pub struct FallbackDispatcher {
    scheduler: Arc<BatchScheduler>,
    host: Option<Arc<dyn IBackgroundHost>>,
}

impl FallbackDispatcher {
    pub fn new(scheduler: Arc<BatchScheduler>, host: Option<Arc<dyn IBackgroundHost>>) -> Self {
        Self { scheduler, host }
    }

    /// Starts `operation_id`; only the `disabled` path does work inline
    #[tracing::instrument(skip(self, operation_id, capability), fields(operation_id = %operation_id))]
    pub async fn start_with_fallback(
        &self,
        operation_id: &OperationId,
        capability: &CapabilitySnapshot,
    ) -> Result<Dispatch, SyncError> {
        if capability.is_available {
            if let Some(host) = &self.host {
                match host.register_deferred(operation_id).await {
                    Ok(()) => {
                        info!("Operation registered for deferred execution");
                        return Ok(Dispatch::Deferred);
                    }
                    Err(e) => {
                        warn!(error = %e, "Deferred registration failed, running immediately");
                        self.record_strategy(operation_id, FallbackStrategy::Immediate)
                            .await?;
                        self.spawn_run(operation_id.clone());
                        return Ok(Dispatch::Fallback(FallbackStrategy::Immediate));
                    }
                }
            }
        }

        let strategy = capability.fallback_strategy;
        self.record_strategy(operation_id, strategy).await?;
        match strategy {
            FallbackStrategy::Immediate => self.spawn_run(operation_id.clone()),
            FallbackStrategy::Polling => self.spawn_polling(operation_id.clone()).await?,
            FallbackStrategy::Manual => {
                self.scheduler.events().publish(SyncEvent::ManualSyncRequired {
                    operation_id: operation_id.clone(),
                    reason: capability.reason.clone(),
                });
                self.spawn_run(operation_id.clone());
            }
            FallbackStrategy::Disabled => {
                self.scheduler.events().publish(SyncEvent::ManualSyncRequired {
                    operation_id: operation_id.clone(),
                    reason: format!("Background sync is disabled: {}", capability.reason),
                });
                self.scheduler.tracker().cancel(operation_id).await;
                self.scheduler.drop_plan(operation_id);
                info!("Background sync disabled, operation closed without work");
            }
        }
        Ok(Dispatch::Fallback(strategy))
    }

    async fn record_strategy(
        &self,
        operation_id: &OperationId,
        strategy: FallbackStrategy,
    ) -> Result<(), SyncError> {
        self.scheduler
            .tracker()
            .update(operation_id, |op| {
                op.set_strategy(strategy);
                Ok(())
            })
            .await?;
        Ok(())
    }

    fn spawn_run(&self, operation_id: OperationId) {
        let scheduler = Arc::clone(&self.scheduler);
        self.scheduler.spawn(async move {
            if let Err(e) = scheduler.run_operation(&operation_id).await {
                warn!(operation_id = %operation_id, error = %e, "Operation run failed");
            }
        });
    }

    async fn spawn_polling(&self, operation_id: OperationId) -> Result<(), SyncError> {
        let operation = self
            .scheduler
            .tracker()
            .snapshot(&operation_id)
            .ok_or_else(|| SyncError::OperationNotFound(operation_id.to_string()))?;
        let period = self.scheduler.config().polling_interval(operation.priority());
        let attempts = self.scheduler.config().sync.polling_max_attempts.max(1);
        debug!(
            period_ms = period.as_millis() as u64,
            attempts, "Polling fallback scheduled"
        );

        self.scheduler.retry_when_unavailable(&operation_id);
        let scheduler = Arc::clone(&self.scheduler);
        self.scheduler.spawn(async move {
            poll_until_terminal(scheduler, operation_id, period, attempts).await;
        });
        Ok(())
    }
}

async fn poll_until_terminal(
    scheduler: Arc<BatchScheduler>,
    operation_id: OperationId,
    period: std::time::Duration,
    attempts: u32,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = scheduler.shutdown_token().clone();

    for attempt in 1..=attempts {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(operation_id = %operation_id, "Polling stopped by shutdown");
                scheduler.tracker().cancel(&operation_id).await;
                scheduler.drop_plan(&operation_id);
                return;
            }
            _ = ticker.tick() => {}
        }

        match scheduler.run_attempt(&operation_id).await {
            Ok(operation) if operation.is_terminal() => {
                debug!(operation_id = %operation_id, attempt, "Polled operation finished");
                return;
            }
            Ok(_) => {}
            Err(SyncError::OperationNotFound(_)) => return,
            Err(e) => {
                warn!(operation_id = %operation_id, attempt, error = %e, "Polling attempt failed");
            }
        }
    }

    warn!(operation_id = %operation_id, attempts, "Polling attempts exhausted");
    scheduler.drop_plan(&operation_id);
    if let Err(e) = scheduler
        .tracker()
        .abort(&operation_id, "polling attempts exhausted")
        .await
    {
        warn!(operation_id = %operation_id, error = %e, "Failed to fail polled operation");
    }
}
