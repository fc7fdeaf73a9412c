//! The connecting side of the TCP transport.

use tracing::debug;
use {
    async_trait::async_trait,
    std::io,
    std::net::SocketAddr,
    std::sync::{Arc, Mutex},
    tokio::net::TcpStream,
};

use crate::error::{Error, Result};
use crate::handler::ClientHandler;
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::stream::engine::{self, State, StreamCallbacks, StreamCore};
use crate::tcp::server::configure_stream;

/// A TCP client. May be reconnected in place after a disconnect; queue and
/// counters reset on each connect.
pub struct TcpClient {
    core: Arc<StreamCore>,
    host: String,
    port: u16,
    handler: Arc<dyn ClientHandler<TcpClient>>,
    remote: Mutex<Option<SocketAddr>>,
}

impl TcpClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        handler: Arc<dyn ClientHandler<TcpClient>>,
        options: StreamOptions,
    ) -> Arc<TcpClient> {
        Arc::new(TcpClient {
            core: StreamCore::new(options),
            host: host.into(),
            port,
            handler,
            remote: Mutex::new(None),
        })
    }

    pub fn id(&self) -> EndpointId {
        self.core.id()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The resolved remote address of the current (or last) connection.
    pub fn address(&self) -> Option<SocketAddr> {
        *self.remote.lock().unwrap()
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

    /// Connect and start exchanging bytes; resolves once the transport is
    /// established. Fails with [`Error::AlreadyConnected`] when a connection
    /// is already underway.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if !self.core.begin_connect() {
            return Err(Error::AlreadyConnected);
        }
        self.handler.on_connecting().await;
        let stream = match resolve_and_connect(&self.host, self.port).await {
            Ok(stream) => stream,
            Err(error) => {
                self.core.set_state(State::Disconnected);
                return Err(error.into());
            }
        };
        if let Err(error) = configure_stream(&stream, self.core.options()) {
            self.core.set_state(State::Disconnected);
            return Err(error.into());
        }
        match stream.peer_addr() {
            Ok(peer) => *self.remote.lock().unwrap() = Some(peer),
            Err(error) => {
                self.core.set_state(State::Disconnected);
                return Err(error.into());
            }
        }
        self.core.set_state(State::Connected);
        debug!(client = %self.id(), host = %self.host, port = self.port, "connected");
        self.handler.on_connected(self).await;
        let bridge = Arc::new(ClientBridge {
            client: self.clone(),
        });
        engine::spawn(self.core.clone(), stream.into(), bridge);
        Ok(())
    }

    /// Start a connection attempt without waiting for it; progress and
    /// failures surface through the handler.
    pub fn connect_async(self: &Arc<Self>) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(error) = client.connect().await {
                client.handler.on_error(error).await;
            }
        });
    }

    /// Graceful disconnect; resolves once the connection is fully gone.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.core.is_connected() {
            return Err(Error::NotConnected);
        }
        self.core.close(false);
        self.core.wait_disconnected().await;
        Ok(())
    }

    /// Graceful disconnect without waiting; safe to call from callbacks.
    pub fn disconnect_async(&self) {
        self.core.close(false);
    }

    /// Hard close: aborts the in-flight write and drops the socket.
    pub fn abort(&self) {
        self.core.close(true);
    }

    /// Disconnect (if connected) and connect again in place.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        let _ = self.disconnect().await;
        self.connect().await
    }

    pub fn reconnect_async(self: &Arc<Self>) {
        let client = self.clone();
        tokio::spawn(async move {
            let _ = client.reconnect().await;
        });
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
}

/// Resolve the host and try every address in turn, succeeding on the first
/// that connects.
pub(crate) async fn resolve_and_connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut addresses = tokio::net::lookup_host((host, port)).await?;
    let mut connection_error = None;
    loop {
        if let Some(address) = addresses.next() {
            match TcpStream::connect(address).await {
                Ok(stream) => return Ok(stream),
                Err(error) => connection_error = Some(error),
            }
        } else {
            return Err(connection_error.unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("unknown host: {}", host),
                )
            }));
        }
    }
}

struct ClientBridge {
    client: Arc<TcpClient>,
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
