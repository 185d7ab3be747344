//! Background host port (driven/secondary port)
//!
//! The host is whatever runs the engine (the daemon, a test harness). It may
//! offer deferred execution: the engine registers an operation id and the host
//! later calls back into the engine to run it.

use crate::domain::OperationId;

/// Port trait for the deferred background-execution facility
#[async_trait::async_trait]
pub trait IBackgroundHost: Send + Sync {
    /// True if the host has registered itself for background work
    fn has_registration(&self) -> bool;

    /// True if the host can run deferred tasks at all
    fn supports_deferred_execution(&self) -> bool;

    /// Queries whether deferred execution is currently enabled
    ///
    /// May fail, e.g. when the underlying service is unreachable.
    async fn deferred_execution_enabled(&self) -> anyhow::Result<bool>;

    /// Schedules `operation_id` for deferred execution
    async fn register_deferred(&self, operation_id: &OperationId) -> anyhow::Result<()>;
}
