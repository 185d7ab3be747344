//! Sending end of the control channel

use tokio::sync::{broadcast, mpsc, oneshot};

use trektrack_conflict::ReviewChoice;
use trektrack_core::domain::{
    CapabilitySnapshot, EntityId, Operation, OperationId, PendingConflicts, SyncRequest,
};
use trektrack_sync::{EventBus, StartSyncResponse, SyncEvent};

use crate::server::Envelope;
use crate::types::{Request, Response};
use crate::IpcError;

/// Cloneable handle to a running [`IpcServer`](crate::IpcServer)
#[derive(Clone)]
pub struct IpcClient {
    tx: mpsc::Sender<Envelope>,
    events: EventBus,
}

impl IpcClient {
    pub(crate) fn new(tx: mpsc::Sender<Envelope>, events: EventBus) -> Self {
        Self { tx, events }
    }

    /// Sends a raw request and waits for its response
    pub async fn request(&self, request: Request) -> Result<Response, IpcError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| IpcError::ChannelClosed)?;
        rx.await.map_err(|_| IpcError::ChannelClosed)
    }

    /// Receives every engine event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    async fn call<T>(
        &self,
        request: Request,
        extract: impl FnOnce(Response) -> Result<T, Response>,
    ) -> Result<T, IpcError> {
        let name = request.name();
        match extract(self.request(request).await?) {
            Ok(value) => Ok(value),
            Err(Response::Error { message }) => Err(IpcError::Remote(message)),
            Err(other) => Err(IpcError::UnexpectedResponse {
                request: name,
                response: other.name(),
            }),
        }
    }

    // ========================================================================
    // Typed requests
    // ========================================================================

    pub async fn start_sync(&self, request: SyncRequest) -> Result<StartSyncResponse, IpcError> {
        self.call(Request::StartSync(request), |r| match r {
            Response::SyncStarted(started) => Ok(started),
            other => Err(other),
        })
        .await
    }

    /// Returns whether the cancellation was accepted
    pub async fn cancel_sync(&self, operation_id: OperationId) -> Result<bool, IpcError> {
        self.call(Request::CancelSync { operation_id }, |r| match r {
            Response::SyncCancelled { cancelled, .. } => Ok(cancelled),
            other => Err(other),
        })
        .await
    }

    pub async fn get_progress(
        &self,
        operation_id: Option<OperationId>,
    ) -> Result<Option<Operation>, IpcError> {
        self.call(Request::GetProgress { operation_id }, |r| match r {
            Response::Progress(op) => Ok(op),
            other => Err(other),
        })
        .await
    }

    pub async fn get_all_progress(&self) -> Result<Vec<Operation>, IpcError> {
        self.call(Request::GetAllProgress, |r| match r {
            Response::AllProgress(ops) => Ok(ops),
            other => Err(other),
        })
        .await
    }

    pub async fn get_sync_capability(&self) -> Result<CapabilitySnapshot, IpcError> {
        self.call(Request::GetSyncCapability, |r| match r {
            Response::Capability(capability) => Ok(capability),
            other => Err(other),
        })
        .await
    }

    pub async fn list_conflicts(&self) -> Result<Vec<PendingConflicts>, IpcError> {
        self.call(Request::ListConflicts, |r| match r {
            Response::Conflicts(conflicts) => Ok(conflicts),
            other => Err(other),
        })
        .await
    }

    pub async fn resolve_conflict(
        &self,
        entity_id: EntityId,
        field: impl Into<String>,
        choice: ReviewChoice,
    ) -> Result<bool, IpcError> {
        let request = Request::ResolveConflict {
            entity_id,
            field: field.into(),
            choice,
        };
        self.call(request, |r| match r {
            Response::ConflictResolved(resolved) => Ok(resolved),
            other => Err(other),
        })
        .await
    }

    /// Returns the number of records removed
    pub async fn clear_cache(&self, entity_id: Option<EntityId>) -> Result<u64, IpcError> {
        self.call(Request::ClearCache { entity_id }, |r| match r {
            Response::CacheCleared(removed) => Ok(removed),
            other => Err(other),
        })
        .await
    }

    pub async fn get_metrics(&self) -> Result<String, IpcError> {
        self.call(Request::GetMetrics, |r| match r {
            Response::Metrics(text) => Ok(text),
            other => Err(other),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{engine, entity, source};
    use crate::IpcServer;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_events_fan_out_to_every_subscriber() {
        let engine = engine();
        let (server, client) = IpcServer::channel(engine.clone(), 8);
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));

        let mut first = client.subscribe();
        let mut second = client.clone().subscribe();
        client
            .start_sync(SyncRequest::new(vec![entity("voy-s03e26")], vec![source("trakt")]))
            .await
            .unwrap();
        engine.settle().await;

        let names = |rx: &mut broadcast::Receiver<SyncEvent>| {
            std::iter::from_fn(|| rx.try_recv().ok())
                .map(|e| e.name())
                .collect::<Vec<_>>()
        };
        let seen = names(&mut first);
        assert!(seen.contains(&"capability-update"));
        assert!(seen.contains(&"progress-update"));
        assert_eq!(seen, names(&mut second));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_mismatched_response_is_reported() {
        let (tx, mut rx) = mpsc::channel::<Envelope>(1);
        let client = IpcClient::new(tx, EventBus::default());
        tokio::spawn(async move {
            if let Some(envelope) = rx.recv().await {
                let _ = envelope.reply.send(Response::CacheCleared(3));
            }
        });

        let err = client.get_all_progress().await.unwrap_err();
        assert!(matches!(
            err,
            IpcError::UnexpectedResponse {
                request: "GET_ALL_PROGRESS",
                response: "CACHE_CLEARED"
            }
        ));
    }
}
