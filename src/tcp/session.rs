//! A server-side endpoint bound to one accepted TCP connection.

use {
    async_trait::async_trait,
    std::net::SocketAddr,
    std::sync::{Arc, Weak},
};

use crate::error::{Error, Result};
use crate::id::EndpointId;
use crate::stream::engine::{StreamCallbacks, StreamCore};
use crate::tcp::server::TcpServer;

pub struct TcpSession {
    core: Arc<StreamCore>,
    /// Back-reference for multicast; never extends the server's lifetime.
    server: Weak<TcpServer>,
    address: SocketAddr,
}

impl TcpSession {
    pub(crate) fn new(
        core: Arc<StreamCore>,
        server: Weak<TcpServer>,
        address: SocketAddr,
    ) -> TcpSession {
        TcpSession {
            core,
            server,
            address,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.core.id()
    }

    /// The parent server, while it is still alive.
    pub fn server(&self) -> Option<Arc<TcpServer>> {
        self.server.upgrade()
    }

    /// The peer's remote address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.core.bytes_sent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.core.bytes_received()
    }

    pub fn bytes_pending(&self) -> u64 {
        self.core.bytes_pending()
    }

    pub fn bytes_sending(&self) -> u64 {
        self.core.bytes_sending()
    }

    /// Non-blocking enqueue; `false` signals back-pressure.
    pub fn send_async(&self, data: &[u8]) -> bool {
        self.core.send_async(data)
    }

    /// Awaiting enqueue; waits for drain capacity up to the configured send
    /// timeout.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.core.send(data).await
    }

    /// Graceful disconnect: drains queued outbound bytes, then closes, and
    /// resolves once the session is fully gone.
    pub async fn disconnect(&self) {
        self.core.close(false);
        self.core.wait_disconnected().await;
    }

    /// Graceful disconnect without waiting; safe to call from callbacks.
    pub fn disconnect_async(&self) {
        self.core.close(false);
    }

    /// Hard close: aborts the in-flight write and drops the socket.
    pub fn abort(&self) {
        self.core.close(true);
    }

    pub(crate) async fn wait_disconnected(&self) {
        self.core.wait_disconnected().await;
    }

    pub(crate) fn core(&self) -> &Arc<StreamCore> {
        &self.core
    }
}

/// Routes engine events for one session to the server's handler and keeps
/// the session registry consistent.
pub(crate) struct SessionBridge {
    session: Arc<TcpSession>,
    server: Arc<TcpServer>,
}

impl SessionBridge {
    pub fn new(session: Arc<TcpSession>, server: Arc<TcpServer>) -> SessionBridge {
        SessionBridge { session, server }
    }
}

#[async_trait]
impl StreamCallbacks for SessionBridge {
    async fn on_received(&self, data: &[u8]) {
        self.server
            .handler()
            .on_received(&self.session, data)
            .await;
    }

    async fn on_sent(&self, sent: u64, pending: u64) {
        self.server
            .handler()
            .on_sent(&self.session, sent, pending)
            .await;
    }

    async fn on_empty(&self) {
        self.server.handler().on_empty(&self.session).await;
    }

    async fn on_error(&self, error: Error) {
        self.server.handler().on_error(error).await;
    }

    async fn on_closed(&self) {
        self.server
            .handler()
            .on_disconnecting(&self.session)
            .await;
        // The registry entry goes away before user code observes the
        // disconnect.
        self.server.unregister(self.session.id());
        self.server
            .handler()
            .on_disconnected(&self.session)
            .await;
    }
}
