//! Prometheus metrics for the sync engine
//!
//! All series live in a private registry under the `trektrack_` namespace
//! and are exported in text format on demand.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Engine metrics registry
pub struct SyncMetrics {
    registry: Registry,
    /// Counter: entity jobs by outcome (completed, failed, queued, cancelled)
    pub jobs_total: IntCounterVec,
    /// Counter: operations by terminal status
    pub operations_total: IntCounterVec,
    /// Counter: failed lock acquisitions
    pub lock_contention_total: IntCounter,
    /// Counter: field conflicts by merge strategy
    pub conflicts_total: IntCounterVec,
    /// Histogram: lock-to-release time per entity
    pub entity_duration_seconds: Histogram,
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics").finish_non_exhaustive()
    }
}

impl SyncMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("trektrack".to_string()), None)?;

        let jobs_total = IntCounterVec::new(
            Opts::new("sync_jobs_total", "Entity jobs by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(jobs_total.clone()))?;

        let operations_total = IntCounterVec::new(
            Opts::new("sync_operations_total", "Sync operations by terminal status"),
            &["status"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let lock_contention_total = IntCounter::new(
            "lock_contention_total",
            "Lock acquisitions that found the entity busy",
        )?;
        registry.register(Box::new(lock_contention_total.clone()))?;

        let conflicts_total = IntCounterVec::new(
            Opts::new("conflicts_total", "Field conflicts by merge strategy"),
            &["strategy"],
        )?;
        registry.register(Box::new(conflicts_total.clone()))?;

        let entity_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "entity_duration_seconds",
                "Time from lock acquisition to release per entity",
            )
            .buckets(vec![0.05, 0.25, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(entity_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            jobs_total,
            operations_total,
            lock_contention_total,
            conflicts_total,
            entity_duration_seconds,
        })
    }

    pub fn record_jobs(&self, outcome: &str, count: usize) {
        if count > 0 {
            self.jobs_total
                .with_label_values(&[outcome])
                .inc_by(count as u64);
        }
    }

    pub fn record_operation(&self, status: &str) {
        self.operations_total.with_label_values(&[status]).inc();
    }

    pub fn record_contention(&self) {
        self.lock_contention_total.inc();
    }

    pub fn record_conflicts(&self, strategy: &str, count: usize) {
        if count > 0 {
            self.conflicts_total
                .with_label_values(&[strategy])
                .inc_by(count as u64);
        }
    }

    pub fn observe_entity_duration(&self, seconds: f64) {
        self.entity_duration_seconds.observe(seconds);
    }

    /// Text exposition of every series
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
