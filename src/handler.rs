//! Callback surfaces implemented by user code and injected into endpoints at
//! construction. Every method has a default no-op body, so implementers
//! override only the events they care about.
//!
//! Callbacks run on the shared worker pool; for one session `on_received`
//! invocations are serialized in byte order, but `on_sent` may run
//! concurrently with them on another worker. Do not call the awaiting
//! `send`/`connect`/`disconnect` variants from inside a callback of the same
//! endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;

/// Events observed by a server and the sessions it accepts.
#[async_trait]
pub trait ServerHandler<S>: Send + Sync + 'static {
    /// The acceptor is up and listening.
    async fn on_started(&self) {}

    /// The acceptor has shut down and every session is gone.
    async fn on_stopped(&self) {}

    /// A session finished connecting (for TLS servers this fires before the
    /// handshake completes).
    async fn on_connected(&self, _session: &Arc<S>) {}

    /// The session's post-connect handshake is starting (TLS / WebSocket).
    async fn on_handshaking(&self, _session: &Arc<S>) {}

    /// The session's post-connect handshake completed (TLS / WebSocket).
    async fn on_handshaked(&self, _session: &Arc<S>) {}

    /// Payload bytes arrived on a session.
    async fn on_received(&self, _session: &Arc<S>, _data: &[u8]) {}

    /// A queued write was confirmed by the OS. `pending` is the byte count
    /// still queued behind it.
    async fn on_sent(&self, _session: &Arc<S>, _sent: u64, _pending: u64) {}

    /// The session's send queue fully drained.
    async fn on_empty(&self, _session: &Arc<S>) {}

    /// The session is being torn down.
    async fn on_disconnecting(&self, _session: &Arc<S>) {}

    /// The session is gone. Fired exactly once per session, after it has
    /// been removed from the server's registry.
    async fn on_disconnected(&self, _session: &Arc<S>) {}

    /// A session-level or acceptor-level error.
    async fn on_error(&self, _error: Error) {}
}

/// Events observed by a client endpoint.
#[async_trait]
pub trait ClientHandler<C>: Send + Sync + 'static {
    /// A connection attempt is starting.
    async fn on_connecting(&self) {}

    /// The transport connected (for TLS clients this fires before the
    /// handshake completes).
    async fn on_connected(&self, _client: &Arc<C>) {}

    /// The post-connect handshake is starting (TLS / WebSocket).
    async fn on_handshaking(&self, _client: &Arc<C>) {}

    /// The post-connect handshake completed (TLS / WebSocket).
    async fn on_handshaked(&self, _client: &Arc<C>) {}

    /// Payload bytes arrived.
    async fn on_received(&self, _client: &Arc<C>, _data: &[u8]) {}

    /// A queued write was confirmed by the OS.
    async fn on_sent(&self, _client: &Arc<C>, _sent: u64, _pending: u64) {}

    /// The send queue fully drained.
    async fn on_empty(&self, _client: &Arc<C>) {}

    /// The connection is being torn down.
    async fn on_disconnecting(&self, _client: &Arc<C>) {}

    /// The connection is gone. Fired exactly once per connect.
    async fn on_disconnected(&self, _client: &Arc<C>) {}

    async fn on_error(&self, _error: Error) {}
}

/// A handler that ignores every event. Useful as a placeholder when only the
/// observables or the awaiting call surface are needed.
pub struct NopHandler;

#[async_trait]
impl<S: Send + Sync + 'static> ServerHandler<S> for NopHandler {}

#[async_trait]
impl<C: Send + Sync + 'static> ClientHandler<C> for NopHandler {}
