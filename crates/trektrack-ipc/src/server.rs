//! Request loop
//!
//! [`IpcServer::run`] receives [`Request`]s from every [`IpcClient`] and
//! answers each on its oneshot reply. `START_SYNC` is handled on its own
//! task since capability detection may wait on the background host; every
//! other request is answered inline, in arrival order.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trektrack_sync::SyncEngine;

use crate::client::IpcClient;
use crate::types::{Request, Response};

/// Default number of requests buffered before senders wait
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A request paired with the channel its answer goes back on
pub(crate) struct Envelope {
    pub(crate) request: Request,
    pub(crate) reply: oneshot::Sender<Response>,
}

/// Receiving end of the control channel
pub struct IpcServer {
    engine: SyncEngine,
    rx: mpsc::Receiver<Envelope>,
}

impl IpcServer {
    /// Creates the server and a client connected to it
    pub fn channel(engine: SyncEngine, capacity: usize) -> (IpcServer, IpcClient) {
        let (tx, rx) = mpsc::channel(capacity);
        let client = IpcClient::new(tx, engine.events().clone());
        (Self { engine, rx }, client)
    }

    /// Serves requests until `shutdown` fires or every client is dropped
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("IPC request loop started");
        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            let Envelope { request, reply } = envelope;
            debug!(request = request.name(), "IPC request received");

            if let Request::StartSync(_) = request {
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    answer(reply, dispatch(&engine, request).await);
                });
            } else {
                answer(reply, dispatch(&self.engine, request).await);
            }
        }
        info!("IPC request loop stopped");
    }
}

fn answer(reply: oneshot::Sender<Response>, response: Response) {
    if reply.send(response).is_err() {
        debug!("IPC caller went away before the reply");
    }
}

/// Runs one request against the engine
pub async fn dispatch(engine: &SyncEngine, request: Request) -> Response {
    let name = request.name();
    let response = match request {
        Request::StartSync(sync) => engine
            .start_sync(sync)
            .await
            .map_or_else(Response::error, Response::SyncStarted),
        Request::CancelSync { operation_id } => {
            let cancelled = engine.cancel_sync(&operation_id).await;
            Response::SyncCancelled {
                operation_id,
                cancelled,
            }
        }
        Request::GetProgress { operation_id } => {
            Response::Progress(engine.get_progress(operation_id.as_ref()).await)
        }
        Request::GetAllProgress => Response::AllProgress(engine.get_all_progress()),
        Request::GetSyncCapability => Response::Capability(engine.get_sync_capability().await),
        Request::ListConflicts => engine
            .list_conflicts()
            .await
            .map_or_else(Response::error, Response::Conflicts),
        Request::ResolveConflict {
            entity_id,
            field,
            choice,
        } => engine
            .resolve_conflict(&entity_id, &field, choice)
            .await
            .map_or_else(Response::error, Response::ConflictResolved),
        Request::ClearCache { entity_id } => engine
            .clear_cache(entity_id.as_ref())
            .await
            .map_or_else(Response::error, Response::CacheCleared),
        Request::GetMetrics => engine
            .metrics_text()
            .map_or_else(Response::error, Response::Metrics),
    };

    if let Response::Error { message } = &response {
        warn!(request = name, error = %message, "IPC request failed");
    }
    response
}
