//! A server-side endpoint bound to one accepted Unix-socket connection.

use {
    async_trait::async_trait,
    std::sync::{Arc, Weak},
};

use crate::error::{Error, Result};
use crate::id::EndpointId;
use crate::stream::engine::{StreamCallbacks, StreamCore};
use crate::uds::server::UdsServer;

pub struct UdsSession {
    core: Arc<StreamCore>,
    server: Weak<UdsServer>,
}

impl UdsSession {
    pub(crate) fn new(core: Arc<StreamCore>, server: Weak<UdsServer>) -> UdsSession {
        UdsSession { core, server }
    }

    pub fn id(&self) -> EndpointId {
        self.core.id()
    }

    pub fn server(&self) -> Option<Arc<UdsServer>> {
        self.server.upgrade()
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

    pub fn send_async(&self, data: &[u8]) -> bool {
        self.core.send_async(data)
    }

    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.core.send(data).await
    }

    pub async fn disconnect(&self) {
        self.core.close(false);
        self.core.wait_disconnected().await;
    }

    pub fn disconnect_async(&self) {
        self.core.close(false);
    }

    pub fn abort(&self) {
        self.core.close(true);
    }

    pub(crate) async fn wait_disconnected(&self) {
        self.core.wait_disconnected().await;
    }
}

pub(crate) struct SessionBridge {
    session: Arc<UdsSession>,
    server: Arc<UdsServer>,
}

impl SessionBridge {
    pub fn new(session: Arc<UdsSession>, server: Arc<UdsServer>) -> SessionBridge {
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
        self.server.unregister(self.session.id());
        self.server
            .handler()
            .on_disconnected(&self.session)
            .await;
    }
}
