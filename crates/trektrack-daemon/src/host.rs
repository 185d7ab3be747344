//! In-process background host
//!
//! The daemon is its own deferred-execution host: operations registered by
//! the engine are handed over a channel to [`DeferredRunner`], which runs
//! each one on the daemon's task tracker.

use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use trektrack_core::domain::OperationId;
use trektrack_core::ports::IBackgroundHost;
use trektrack_sync::SyncEngine;

/// Background host backed by the daemon's own runtime
pub struct LocalBackgroundHost {
    tx: mpsc::UnboundedSender<OperationId>,
}

impl LocalBackgroundHost {
    /// Creates the host and the runner that executes what it accepts
    pub fn new() -> (Self, DeferredRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DeferredRunner { rx })
    }
}

#[async_trait::async_trait]
impl IBackgroundHost for LocalBackgroundHost {
    fn has_registration(&self) -> bool {
        true
    }

    fn supports_deferred_execution(&self) -> bool {
        true
    }

    async fn deferred_execution_enabled(&self) -> anyhow::Result<bool> {
        Ok(!self.tx.is_closed())
    }

    async fn register_deferred(&self, operation_id: &OperationId) -> anyhow::Result<()> {
        self.tx
            .send(operation_id.clone())
            .map_err(|_| anyhow!("deferred task runner has stopped"))
    }
}

/// Receives deferred operations and runs them
pub struct DeferredRunner {
    rx: mpsc::UnboundedReceiver<OperationId>,
}

impl DeferredRunner {
    /// Runs every registered operation until `shutdown` fires
    pub async fn run(mut self, engine: SyncEngine, tasks: TaskTracker, shutdown: CancellationToken) {
        loop {
            let operation_id = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };
            debug!(operation_id = %operation_id, "Running deferred operation");
            let engine = engine.clone();
            tasks.spawn(async move {
                if let Err(e) = engine.run_deferred(&operation_id).await {
                    warn!(operation_id = %operation_id, error = %e, "Deferred operation failed");
                }
            });
        }
        debug!("Deferred runner stopped");
    }
}

/// Evicts finished operations from memory every `period`
pub async fn retention_sweeper(engine: SyncEngine, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs(), "Retention sweeper started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let evicted = engine.sweep_retention();
                if !evicted.is_empty() {
                    debug!(evicted = evicted.len(), "Evicted finished operations");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use trektrack_cache::InMemoryStore;
    use trektrack_core::config::Config;
    use trektrack_core::domain::{
        EntityId, FallbackStrategy, MetadataRecord, OperationStatus, SourceId, SyncRequest,
    };
    use trektrack_core::ports::IMetadataFetcher;

    use super::*;

    struct EchoFetcher;

    #[async_trait::async_trait]
    impl IMetadataFetcher for EchoFetcher {
        async fn enrich_entity(
            &self,
            entity_id: &EntityId,
            sources: &[SourceId],
        ) -> anyhow::Result<MetadataRecord> {
            Ok(MetadataRecord::new(sources[0].clone())
                .with_field("title", json!(entity_id.to_string())))
        }
    }

    fn request(id: &str) -> SyncRequest {
        SyncRequest::new(
            vec![EntityId::new(id).unwrap()],
            vec![SourceId::new("trakt").unwrap()],
        )
    }

    #[tokio::test]
    async fn test_registered_operations_run_on_the_runner() {
        let (host, runner) = LocalBackgroundHost::new();
        let engine = SyncEngine::builder(Arc::new(EchoFetcher), Arc::new(InMemoryStore::new()))
            .background_host(Arc::new(host))
            .build()
            .unwrap();
        let tasks = TaskTracker::new();
        let shutdown = CancellationToken::new();
        tokio::spawn(runner.run(engine.clone(), tasks.clone(), shutdown.clone()));

        let started = engine.start_sync(request("tng-s07e25")).await.unwrap();
        assert!(started.capability.is_available);

        let op = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(op) = engine.get_progress(Some(&started.operation_id)).await {
                    if op.status() == OperationStatus::Completed {
                        return op;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(op.completed_jobs(), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_registration_fails_once_runner_is_gone() {
        let (host, runner) = LocalBackgroundHost::new();
        drop(runner);
        assert!(!host.deferred_execution_enabled().await.unwrap());
        assert!(host
            .register_deferred(&"op-1".parse().unwrap())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_after_retention() {
        let mut config = Config::default();
        config.background.force_strategy = Some(FallbackStrategy::Immediate);
        let engine = SyncEngine::builder(Arc::new(EchoFetcher), Arc::new(InMemoryStore::new()))
            .config(&config)
            .build()
            .unwrap();
        engine.start_sync(request("ds9-s07e25")).await.unwrap();
        engine.settle().await;
        assert_eq!(engine.scheduler().tracker().live_count(), 1);

        let shutdown = CancellationToken::new();
        tokio::spawn(retention_sweeper(
            engine.clone(),
            Duration::from_secs(60),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(engine.scheduler().tracker().live_count(), 1);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(engine.scheduler().tracker().live_count(), 0);
        shutdown.cancel();
    }
}
