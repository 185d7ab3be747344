//! D-Bus service for the trektrack daemon
//!
//! Exports the control surface on the session bus as
//! `dev.trektrack.Sync`. Structured arguments and results travel as JSON
//! strings using the same shapes as the channel API; engine events are
//! re-emitted as signals carrying the event's JSON.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbus::fdo;

use trektrack_conflict::ReviewChoice;
use trektrack_core::domain::{EntityId, OperationId, SyncRequest};
use trektrack_sync::SyncEvent;

use crate::client::IpcClient;
use crate::IpcError;

/// D-Bus well-known name for the trektrack daemon
pub const DBUS_NAME: &str = "dev.trektrack.Sync";

/// D-Bus object path for the service
pub const DBUS_PATH: &str = "/dev/trektrack/Sync";

fn failed(err: impl std::fmt::Display) -> fdo::Error {
    fdo::Error::Failed(err.to_string())
}

fn invalid(err: impl std::fmt::Display) -> fdo::Error {
    fdo::Error::InvalidArgs(err.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

/// Empty string means "not given"
fn optional<T>(raw: &str) -> fdo::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(invalid)
}

fn remote(err: IpcError) -> fdo::Error {
    match err {
        IpcError::Remote(message) => fdo::Error::Failed(message),
        other => failed(other),
    }
}

// ============================================================================
// Sync interface
// ============================================================================

/// D-Bus interface forwarding every call to the request loop
pub struct SyncInterface {
    client: IpcClient,
}

impl SyncInterface {
    pub fn new(client: IpcClient) -> Self {
        Self { client }
    }
}

#[zbus::interface(name = "dev.trektrack.Sync")]
impl SyncInterface {
    /// Starts a sync
    ///
    /// `request` is a JSON object with `entityIds`, `sources` and the
    /// optional `operationId`, `priority`, `affinity` and
    /// `conflictStrategy`. Returns `{operationId, capability}` as JSON.
    async fn start_sync(&self, request: String) -> fdo::Result<String> {
        let request: SyncRequest = serde_json::from_str(&request).map_err(invalid)?;
        let started = self.client.start_sync(request).await.map_err(remote)?;
        to_json(&started)
    }

    /// Returns `true` if the operation was running and is now cancelled
    async fn cancel_sync(&self, operation_id: String) -> fdo::Result<bool> {
        let operation_id: OperationId = operation_id.parse().map_err(invalid)?;
        self.client.cancel_sync(operation_id).await.map_err(remote)
    }

    /// Operation JSON, or `null` if unknown
    ///
    /// An empty id asks for the most recently started operation.
    async fn get_progress(&self, operation_id: String) -> fdo::Result<String> {
        let operation_id = optional::<OperationId>(&operation_id)?;
        let progress = self.client.get_progress(operation_id).await.map_err(remote)?;
        to_json(&progress)
    }

    /// JSON array of every running operation
    async fn get_all_progress(&self) -> fdo::Result<String> {
        to_json(&self.client.get_all_progress().await.map_err(remote)?)
    }

    async fn get_sync_capability(&self) -> fdo::Result<String> {
        to_json(&self.client.get_sync_capability().await.map_err(remote)?)
    }

    /// JSON array of entities with conflicts awaiting review
    async fn list_conflicts(&self) -> fdo::Result<String> {
        to_json(&self.client.list_conflicts().await.map_err(remote)?)
    }

    /// Settles one field conflict
    ///
    /// `choice` is `keep-existing` or `take-new`. Returns `false` if no
    /// such conflict is pending.
    async fn resolve_conflict(
        &self,
        entity_id: String,
        field: String,
        choice: String,
    ) -> fdo::Result<bool> {
        let entity_id: EntityId = entity_id.parse().map_err(invalid)?;
        let choice: ReviewChoice =
            serde_json::from_value(serde_json::Value::String(choice)).map_err(invalid)?;
        self.client
            .resolve_conflict(entity_id, field, choice)
            .await
            .map_err(remote)
    }

    /// Drops cached metadata; an empty id clears every entity
    async fn clear_cache(&self, entity_id: String) -> fdo::Result<u64> {
        let entity_id = optional::<EntityId>(&entity_id)?;
        self.client.clear_cache(entity_id).await.map_err(remote)
    }

    /// Prometheus text exposition of the engine metrics
    async fn get_metrics(&self) -> fdo::Result<String> {
        self.client.get_metrics().await.map_err(remote)
    }

    /// Full operation snapshot after any change
    #[zbus(signal)]
    async fn progress_update(
        signal_ctxt: &zbus::SignalContext<'_>,
        operation: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn capability_update(
        signal_ctxt: &zbus::SignalContext<'_>,
        capability: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn batch_warming_complete(
        signal_ctxt: &zbus::SignalContext<'_>,
        batch: &str,
    ) -> zbus::Result<()>;

    /// The user has to trigger the sync themselves
    #[zbus(signal)]
    async fn manual_sync_required(
        signal_ctxt: &zbus::SignalContext<'_>,
        details: &str,
    ) -> zbus::Result<()>;
}

/// Emits the signal matching one engine event
async fn emit(ctxt: &zbus::SignalContext<'_>, event: &SyncEvent) -> Result<(), IpcError> {
    let payload = serde_json::to_string(event)?;
    match event {
        SyncEvent::ProgressUpdate { .. } => SyncInterface::progress_update(ctxt, &payload).await?,
        SyncEvent::CapabilityUpdate { .. } => {
            SyncInterface::capability_update(ctxt, &payload).await?
        }
        SyncEvent::BatchWarmingComplete { .. } => {
            SyncInterface::batch_warming_complete(ctxt, &payload).await?
        }
        SyncEvent::ManualSyncRequired { .. } => {
            SyncInterface::manual_sync_required(ctxt, &payload).await?
        }
    }
    Ok(())
}

// ============================================================================
// Service
// ============================================================================

/// Owns the session bus connection and the signal forwarder
pub struct DbusService {
    client: IpcClient,
}

impl DbusService {
    pub fn new(client: IpcClient) -> Self {
        Self { client }
    }

    /// Starts the D-Bus service on the session bus
    ///
    /// Returns the connection, which must be kept alive for the service to
    /// remain reachable.
    ///
    /// # Errors
    /// Fails if the session bus is unavailable or the well-known name is
    /// already owned by another instance.
    pub async fn start(&self) -> Result<zbus::Connection, IpcError> {
        info!("Starting D-Bus service on session bus");
        let connection = zbus::connection::Builder::session()?
            .name(DBUS_NAME)?
            .serve_at(DBUS_PATH, SyncInterface::new(self.client.clone()))?
            .build()
            .await?;
        info!(name = DBUS_NAME, path = DBUS_PATH, "D-Bus service started");
        Ok(connection)
    }

    /// Re-emits engine events as D-Bus signals until `shutdown` fires
    pub async fn forward_events(
        &self,
        connection: zbus::Connection,
        shutdown: CancellationToken,
    ) -> Result<(), IpcError> {
        let ctxt = zbus::SignalContext::new(&connection, DBUS_PATH)?;
        let mut events = self.client.subscribe();
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => received,
            };
            match event {
                Ok(event) => {
                    if let Err(e) = emit(&ctxt, &event).await {
                        warn!(event = event.name(), error = %e, "Failed to emit D-Bus signal");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "D-Bus signal forwarder lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("D-Bus signal forwarder stopped");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{IpcServer, DEFAULT_CHANNEL_CAPACITY};
    use crate::test_support::engine;
    use trektrack_sync::SyncEngine;

    fn interface() -> (SyncInterface, SyncEngine, CancellationToken) {
        let engine = engine();
        let (server, client) = IpcServer::channel(engine.clone(), DEFAULT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));
        (SyncInterface::new(client), engine, shutdown)
    }

    #[test]
    fn test_dbus_constants() {
        assert_eq!(DBUS_NAME, "dev.trektrack.Sync");
        assert!(DBUS_PATH.starts_with('/'));
    }

    #[tokio::test]
    async fn test_start_sync_round_trip_through_json() {
        let (iface, engine, _shutdown) = interface();
        let started = iface
            .start_sync(
                r#"{"operationId": "dbus-1", "entityIds": ["tos-s01e01"], "sources": ["trakt"]}"#
                    .to_string(),
            )
            .await
            .unwrap();
        let started: serde_json::Value = serde_json::from_str(&started).unwrap();
        assert_eq!(started["operationId"], "dbus-1");
        assert!(started["capability"]["reason"].is_string());
        engine.settle().await;

        let progress: serde_json::Value =
            serde_json::from_str(&iface.get_progress("dbus-1".to_string()).await.unwrap())
                .unwrap();
        assert_eq!(progress["id"], "dbus-1");
        assert_eq!(progress["status"], "completed");

        let latest: serde_json::Value =
            serde_json::from_str(&iface.get_progress(String::new()).await.unwrap()).unwrap();
        assert_eq!(latest["id"], "dbus-1");
        assert_eq!(iface.get_all_progress().await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_unknown_progress_is_null() {
        let (iface, _engine, _shutdown) = interface();
        assert_eq!(
            iface.get_progress("op-missing".to_string()).await.unwrap(),
            "null"
        );
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_invalid_args() {
        let (iface, _engine, _shutdown) = interface();
        assert!(matches!(
            iface.start_sync("{not json".to_string()).await,
            Err(fdo::Error::InvalidArgs(_))
        ));
        assert!(matches!(
            iface.cancel_sync(String::new()).await,
            Err(fdo::Error::InvalidArgs(_))
        ));
        assert!(matches!(
            iface
                .resolve_conflict("tng-s01e01".into(), "title".into(), "both".into())
                .await,
            Err(fdo::Error::InvalidArgs(_))
        ));
        assert!(matches!(
            iface.clear_cache("a/b".to_string()).await,
            Err(fdo::Error::InvalidArgs(_))
        ));
    }

    #[tokio::test]
    async fn test_engine_errors_are_failed() {
        let (iface, _engine, _shutdown) = interface();
        let result = iface
            .start_sync(r#"{"entityIds": [], "sources": ["trakt"]}"#.to_string())
            .await;
        assert!(matches!(result, Err(fdo::Error::Failed(msg)) if msg.contains("entityIds")));
    }

    #[tokio::test]
    async fn test_conflicts_and_cache_without_data() {
        let (iface, _engine, _shutdown) = interface();
        assert_eq!(iface.list_conflicts().await.unwrap(), "[]");
        assert!(!iface
            .resolve_conflict("tng-s01e01".into(), "title".into(), "take-new".into())
            .await
            .unwrap());
        assert_eq!(iface.clear_cache(String::new()).await.unwrap(), 0);
        assert!(!iface.cancel_sync("op-missing".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_metrics_is_prometheus_text() {
        let (iface, _engine, _shutdown) = interface();
        let text = iface.get_metrics().await.unwrap();
        assert!(text.contains("# TYPE trektrack_"));
    }
}
