//! The connecting side of the Unix-socket transport.

use tracing::debug;
use {
    async_trait::async_trait,
    std::path::{Path, PathBuf},
    std::sync::Arc,
    tokio::net::UnixStream,
};

use crate::error::{Error, Result};
use crate::handler::ClientHandler;
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::stream::engine::{self, State, StreamCallbacks, StreamCore};

pub struct UdsClient {
    core: Arc<StreamCore>,
    path: PathBuf,
    handler: Arc<dyn ClientHandler<UdsClient>>,
}

impl UdsClient {
    pub fn new(
        path: impl Into<PathBuf>,
        handler: Arc<dyn ClientHandler<UdsClient>>,
        options: StreamOptions,
    ) -> Arc<UdsClient> {
        Arc::new(UdsClient {
            core: StreamCore::new(options),
            path: path.into(),
            handler,
        })
    }

    pub fn id(&self) -> EndpointId {
        self.core.id()
    }

    pub fn path(&self) -> &Path {
        &self.path
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

    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if !self.core.begin_connect() {
            return Err(Error::AlreadyConnected);
        }
        self.handler.on_connecting().await;
        let stream = match UnixStream::connect(&self.path).await {
            Ok(stream) => stream,
            Err(error) => {
                self.core.set_state(State::Disconnected);
                return Err(error.into());
            }
        };
        self.core.set_state(State::Connected);
        debug!(client = %self.id(), path = %self.path.display(), "connected");
        self.handler.on_connected(self).await;
        let bridge = Arc::new(ClientBridge {
            client: self.clone(),
        });
        engine::spawn(self.core.clone(), stream.into(), bridge);
        Ok(())
    }

    pub fn connect_async(self: &Arc<Self>) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(error) = client.connect().await {
                client.handler.on_error(error).await;
            }
        });
    }

    pub async fn disconnect(&self) -> Result<()> {
        if !self.core.is_connected() {
            return Err(Error::NotConnected);
        }
        self.core.close(false);
        self.core.wait_disconnected().await;
        Ok(())
    }

    pub fn disconnect_async(&self) {
        self.core.close(false);
    }

    pub fn abort(&self) {
        self.core.close(true);
    }

    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        let _ = self.disconnect().await;
        self.connect().await
    }

    pub fn reconnect_async(self: &Arc<Self>) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(error) = client.reconnect().await {
                client.handler.on_error(error).await;
            }
        });
    }

    pub fn send_async(&self, data: &[u8]) -> bool {
        self.core.send_async(data)
    }

    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.core.send(data).await
    }
}

struct ClientBridge {
    client: Arc<UdsClient>,
}

#[async_trait]
impl StreamCallbacks for ClientBridge {
    async fn on_received(&self, data: &[u8]) {
        self.client
            .handler
            .on_received(&self.client, data)
            .await;
    }

    async fn on_sent(&self, sent: u64, pending: u64) {
        self.client
            .handler
            .on_sent(&self.client, sent, pending)
            .await;
    }

    async fn on_empty(&self) {
        self.client.handler.on_empty(&self.client).await;
    }

    async fn on_error(&self, error: Error) {
        self.client.handler.on_error(error).await;
    }

    async fn on_closed(&self) {
        self.client.handler.on_disconnecting(&self.client).await;
        self.client.handler.on_disconnected(&self.client).await;
    }
}
