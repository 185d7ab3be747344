//! trektrack IPC - control surface for the sync engine
//!
//! The engine is driven through a message channel: callers hold an
//! [`IpcClient`], send [`Request`]s and await a [`Response`] on a oneshot
//! reply. [`IpcServer`] owns the receiving end and dispatches to the
//! [`SyncEngine`](trektrack_sync::SyncEngine). Engine events fan out to
//! every subscriber over a broadcast channel.
//!
//! [`service`] exports the same surface on the D-Bus session bus.

pub mod client;
pub mod server;
pub mod service;
pub mod types;

pub use client::IpcClient;
pub use server::IpcServer;
pub use types::{Request, Response};

use trektrack_sync::SyncError;

/// Errors surfaced to IPC callers
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// The request loop has stopped
    #[error("IPC channel closed")]
    ChannelClosed,

    /// The engine rejected the request
    #[error("request failed: {0}")]
    Remote(String),

    /// The server answered with a response of the wrong kind
    #[error("unexpected response to {request}: {response}")]
    UnexpectedResponse {
        request: &'static str,
        response: &'static str,
    },

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),
}
