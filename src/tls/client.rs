//! The connecting side of the TLS transport.

use tracing::debug;
use {
    async_trait::async_trait,
    std::net::SocketAddr,
    std::sync::{Arc, Mutex},
    webpki::DNSNameRef,
};

use crate::error::{Error, Result};
use crate::handler::ClientHandler;
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::stream::engine::{self, State, StreamCallbacks, StreamCore};
use crate::tcp::client::resolve_and_connect;
use crate::tcp::server::configure_stream;
use crate::tls::context::TlsClientContext;

/// A TLS client. The handshake runs against `host`, which therefore must be
/// a DNS name the server's certificate covers.
pub struct SslClient {
    core: Arc<StreamCore>,
    host: String,
    port: u16,
    context: TlsClientContext,
    handler: Arc<dyn ClientHandler<SslClient>>,
    remote: Mutex<Option<SocketAddr>>,
}

impl SslClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        context: TlsClientContext,
        handler: Arc<dyn ClientHandler<SslClient>>,
        options: StreamOptions,
    ) -> Arc<SslClient> {
        Arc::new(SslClient {
            core: StreamCore::new(options),
            host: host.into(),
            port,
            context,
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

    pub fn address(&self) -> Option<SocketAddr> {
        *self.remote.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    pub fn is_handshaked(&self) -> bool {
        self.core.is_handshaked()
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

    /// Connect, run the TLS handshake, and start exchanging plaintext.
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
        self.handler.on_connected(self).await;

        self.core.set_state(State::Handshaking);
        self.handler.on_handshaking(self).await;
        let domain = match DNSNameRef::try_from_ascii_str(&self.host) {
            Ok(domain) => domain.to_owned(),
            Err(invalid) => {
                let error = Error::HandshakeFailure(format!(
                    "invalid DNS name '{}': {}",
                    self.host, invalid
                ));
                self.fail_handshake().await;
                return Err(error);
            }
        };
        // The close signal must be able to interrupt a stalled handshake;
        // the pumps that normally observe it are not running yet.
        let handshake = tokio::select! {
            result = self.context.connector().connect(domain.as_ref(), stream) => Some(result),
            _ = self.core.wait_close_requested() => None,
        };
        match handshake {
            Some(Ok(tls_stream)) => {
                self.core.set_handshaked();
                self.core.set_state(State::Connected);
                debug!(client = %self.id(), host = %self.host, "TLS handshake complete");
                self.handler.on_handshaked(self).await;
                let bridge = Arc::new(ClientBridge {
                    client: self.clone(),
                });
                engine::spawn(self.core.clone(), tls_stream.into(), bridge);
                Ok(())
            }
            Some(Err(handshake_error)) => {
                let error = crate::tls::classify_handshake_error(&handshake_error);
                self.fail_handshake().await;
                Err(error)
            }
            None => {
                self.fail_handshake().await;
                Err(Error::ConnectionAborted)
            }
        }
    }

    /// Tear down after a failed handshake: `on_connected` has fired, so the
    /// matching `on_disconnecting`/`on_disconnected` pair must too, through
    /// the same `Disconnecting` → `Disconnected` sequence as a normal close.
    async fn fail_handshake(self: &Arc<Self>) {
        self.core.set_state(State::Disconnecting);
        self.handler.on_disconnecting(self).await;
        self.core.mark_disconnected();
        self.handler.on_disconnected(self).await;
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
    client: Arc<SslClient>,
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
