//! Shared fakes and builders for sync engine integration tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use trektrack_cache::InMemoryStore;
use trektrack_core::{
    config::{Config, SourceConfig},
    domain::{
        EntityId, FallbackStrategy, MetadataRecord, Operation, OperationId, OperationStatus,
        SourceId,
    },
    ports::{IBackgroundHost, IMetadataFetcher, INotificationService, Notification},
};
use trektrack_sync::SyncEngine;

pub fn entity(id: &str) -> EntityId {
    EntityId::new(id).unwrap()
}

pub fn entities(prefix: &str, n: usize) -> Vec<EntityId> {
    (0..n).map(|i| entity(&format!("{prefix}-e{i:02}"))).collect()
}

pub fn source(name: &str) -> SourceId {
    SourceId::new(name).unwrap()
}

// ============================================================================
// Fetcher
// ============================================================================

/// Fetcher returning `{"title": ...}` records, optionally slowly
#[derive(Default)]
pub struct ScriptedFetcher {
    titles: Mutex<HashMap<EntityId, String>>,
    failing: Mutex<HashSet<EntityId>>,
    down: Mutex<HashSet<SourceId>>,
    latency: Duration,
    calls: Mutex<Vec<(EntityId, SourceId)>>,
    preparations: Mutex<Vec<SourceId>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `latency` first
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn set_title(&self, entity_id: &EntityId, title: &str) {
        self.titles
            .lock()
            .unwrap()
            .insert(entity_id.clone(), title.to_string());
    }

    pub fn fail(&self, entity_id: &EntityId) {
        self.failing.lock().unwrap().insert(entity_id.clone());
    }

    /// Every `prepare_batch` for `source` fails
    pub fn take_down(&self, source: &SourceId) {
        self.down.lock().unwrap().insert(source.clone());
    }

    pub fn calls(&self) -> Vec<(EntityId, SourceId)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn preparations(&self) -> Vec<SourceId> {
        self.preparations.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IMetadataFetcher for ScriptedFetcher {
    async fn enrich_entity(
        &self,
        entity_id: &EntityId,
        sources: &[SourceId],
    ) -> anyhow::Result<MetadataRecord> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let source = sources[0].clone();
        self.calls
            .lock()
            .unwrap()
            .push((entity_id.clone(), source.clone()));
        if self.failing.lock().unwrap().contains(entity_id) {
            anyhow::bail!("episode {entity_id} not found");
        }
        let title = self
            .titles
            .lock()
            .unwrap()
            .get(entity_id)
            .cloned()
            .unwrap_or_else(|| format!("{entity_id} via {source}"));
        Ok(MetadataRecord::new(source).with_field("title", json!(title)))
    }

    async fn prepare_batch(
        &self,
        source: &SourceId,
        _entity_ids: &[EntityId],
    ) -> anyhow::Result<()> {
        self.preparations.lock().unwrap().push(source.clone());
        if self.down.lock().unwrap().contains(source) {
            anyhow::bail!("{source} is down for maintenance");
        }
        Ok(())
    }
}

// ============================================================================
// Background host
// ============================================================================

/// Host with fixed answers that records deferred registrations
pub struct FakeHost {
    registered: bool,
    deferred: bool,
    enabled: bool,
    registrations: Mutex<Vec<OperationId>>,
}

impl FakeHost {
    pub fn new(registered: bool, deferred: bool, enabled: bool) -> Self {
        Self {
            registered,
            deferred,
            enabled,
            registrations: Mutex::new(Vec::new()),
        }
    }

    pub fn registrations(&self) -> Vec<OperationId> {
        self.registrations.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IBackgroundHost for FakeHost {
    fn has_registration(&self) -> bool {
        self.registered
    }

    fn supports_deferred_execution(&self) -> bool {
        self.deferred
    }

    async fn deferred_execution_enabled(&self) -> anyhow::Result<bool> {
        Ok(self.enabled)
    }

    async fn register_deferred(&self, operation_id: &OperationId) -> anyhow::Result<()> {
        self.registrations.lock().unwrap().push(operation_id.clone());
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl INotificationService for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// tmdb: batches of 2 with 1 s pauses; trakt: batches of 5, no pause
pub fn test_config(force: Option<FallbackStrategy>) -> Config {
    let mut config = Config::default();
    config.sources.insert(
        "tmdb".to_string(),
        SourceConfig {
            base_url: "http://tmdb.invalid".to_string(),
            max_batch_size: 2,
            inter_batch_delay_ms: Some(1000),
            requests_per_minute: 240,
            timeout_secs: 5,
        },
    );
    config.sources.insert(
        "trakt".to_string(),
        SourceConfig {
            base_url: "http://trakt.invalid".to_string(),
            max_batch_size: 5,
            inter_batch_delay_ms: Some(0),
            requests_per_minute: 120,
            timeout_secs: 5,
        },
    );
    config.background.force_strategy = force;
    config
}

pub struct Harness {
    pub engine: SyncEngine,
    pub fetcher: Arc<ScriptedFetcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<InMemoryStore>,
}

pub fn harness(
    fetcher: ScriptedFetcher,
    host: Option<Arc<FakeHost>>,
    config: &Config,
) -> Harness {
    let fetcher = Arc::new(fetcher);
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(InMemoryStore::new());
    let mut builder = SyncEngine::builder(fetcher.clone(), store.clone())
        .config(config)
        .notifications(notifier.clone());
    if let Some(host) = host {
        builder = builder.background_host(host);
    }
    Harness {
        engine: builder.build().unwrap(),
        fetcher,
        notifier,
        store,
    }
}

/// Engine that runs every operation immediately
pub fn immediate(fetcher: ScriptedFetcher) -> Harness {
    harness(fetcher, None, &test_config(Some(FallbackStrategy::Immediate)))
}

pub async fn progress(engine: &SyncEngine, id: &OperationId) -> Operation {
    engine.get_progress(Some(id)).await.unwrap()
}

pub fn assert_accounted(op: &Operation) {
    assert_eq!(
        op.completed_jobs() + op.failed_jobs() + op.cancelled_jobs() + op.queued_jobs(),
        op.total_jobs(),
        "every job has exactly one outcome"
    );
}

pub fn assert_status(op: &Operation, status: OperationStatus) {
    assert_eq!(op.status(), status, "operation {}", op.id());
}
