//! A WebSocket client: connects over TCP or TLS, performs the HTTP upgrade,
//! then exchanges masked frames.

use tracing::debug;
use {
    async_trait::async_trait,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    tokio::sync::Notify,
};

use crate::defaults;
use crate::error::{Error, Result};
use crate::handler::ClientHandler;
use crate::http::response::HttpResponse;
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::tcp::TcpClient;
use crate::tls::{SslClient, TlsClientContext};
use crate::ws::frame::{
    close_payload, encode_frame, random_mask, FrameDecoder, OpCode, Role, WsEvent,
};
use crate::ws::handshake::{generate_key, make_upgrade_request, validate_upgrade_response};

#[async_trait]
pub trait WsClientHandler: Send + Sync + 'static {
    /// The transport connected; the upgrade request is on its way.
    async fn on_connected(&self, _client: &Arc<WsClient>) {}

    /// The server accepted the upgrade; frame traffic is live.
    async fn on_ws_connected(&self, _client: &Arc<WsClient>, _response: &HttpResponse) {}

    /// One complete message (text or binary) was reassembled.
    async fn on_ws_received(&self, _client: &Arc<WsClient>, _opcode: OpCode, _payload: &[u8]) {}

    /// A ping arrived; the pong echo has already been queued.
    async fn on_ws_ping(&self, _client: &Arc<WsClient>, _payload: &[u8]) {}

    async fn on_ws_pong(&self, _client: &Arc<WsClient>, _payload: &[u8]) {}

    /// The server sent a close frame; the echo has been queued and the
    /// connection is disconnecting.
    async fn on_ws_close(&self, _client: &Arc<WsClient>, _code: Option<u16>, _reason: &[u8]) {}

    async fn on_disconnected(&self, _client: &Arc<WsClient>) {}

    async fn on_error(&self, _error: Error) {}
}

enum InnerClient {
    Tcp(Arc<TcpClient>),
    Ssl(Arc<SslClient>),
}

enum Phase {
    Upgrading { response: HttpResponse, key: String },
    Open(FrameDecoder),
}

enum ClientStep {
    Pending,
    Upgraded {
        response: HttpResponse,
        leftover: Vec<u8>,
    },
    Events(Vec<WsEvent>),
    Failed(Error),
}

pub struct WsClient {
    inner: InnerClient,
    path: String,
    subprotocols: Vec<String>,
    handler: Arc<dyn WsClientHandler>,
    phase: Mutex<Phase>,
    upgraded: AtomicBool,
    upgrade_signal: Notify,
    sent_close: AtomicBool,
    max_message_size: usize,
}

impl WsClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        handler: Arc<dyn WsClientHandler>,
        options: StreamOptions,
    ) -> Arc<WsClient> {
        let host = host.into();
        Arc::new_cyclic(|client: &Weak<WsClient>| {
            let adapter = Arc::new(Adapter {
                client: client.clone(),
            });
            WsClient {
                inner: InnerClient::Tcp(TcpClient::new(host, port, adapter, options)),
                path: path.into(),
                subprotocols: Vec::new(),
                handler,
                phase: Mutex::new(Phase::Upgrading {
                    response: HttpResponse::new(),
                    key: String::new(),
                }),
                upgraded: AtomicBool::new(false),
                upgrade_signal: Notify::new(),
                sent_close: AtomicBool::new(false),
                max_message_size: defaults::max_ws_message_size(),
            }
        })
    }

    /// A `wss://` client: the same upgrade and framing over TLS.
    pub fn new_tls(
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        context: TlsClientContext,
        handler: Arc<dyn WsClientHandler>,
        options: StreamOptions,
    ) -> Arc<WsClient> {
        let host = host.into();
        Arc::new_cyclic(|client: &Weak<WsClient>| {
            let adapter = Arc::new(Adapter {
                client: client.clone(),
            });
            WsClient {
                inner: InnerClient::Ssl(SslClient::new(host, port, context, adapter, options)),
                path: path.into(),
                subprotocols: Vec::new(),
                handler,
                phase: Mutex::new(Phase::Upgrading {
                    response: HttpResponse::new(),
                    key: String::new(),
                }),
                upgraded: AtomicBool::new(false),
                upgrade_signal: Notify::new(),
                sent_close: AtomicBool::new(false),
                max_message_size: defaults::max_ws_message_size(),
            }
        })
    }

    pub fn id(&self) -> EndpointId {
        match &self.inner {
            InnerClient::Tcp(client) => client.id(),
            InnerClient::Ssl(client) => client.id(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match &self.inner {
            InnerClient::Tcp(client) => client.is_connected(),
            InnerClient::Ssl(client) => client.is_connected(),
        }
    }

    /// True once the upgrade response validated and frame traffic is live.
    pub fn is_handshaked(&self) -> bool {
        self.upgraded.load(Ordering::SeqCst)
    }

    /// Connect, send the upgrade request, and resolve once the server's
    /// `101` has been validated.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let key = generate_key();
        {
            let mut phase = self.phase.lock().unwrap();
            *phase = Phase::Upgrading {
                response: HttpResponse::new(),
                key: key.clone(),
            };
        }
        self.upgraded.store(false, Ordering::SeqCst);
        self.sent_close.store(false, Ordering::SeqCst);

        let (host, port) = match &self.inner {
            InnerClient::Tcp(client) => {
                client.connect().await?;
                (client.host().to_string(), client.port())
            }
            InnerClient::Ssl(client) => {
                client.connect().await?;
                (client.host().to_string(), client.port())
            }
        };
        let request = make_upgrade_request(&host, port, &self.path, &key, &self.subprotocols);
        if !self.send_raw_async(request.cache()) {
            self.disconnect_async();
            return Err(Error::NotConnected);
        }
        self.wait_handshaked().await
    }

    pub fn connect_async(self: &Arc<Self>) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(error) = client.connect().await {
                client.handler.on_error(error).await;
            }
        });
    }

    async fn wait_handshaked(&self) -> Result<()> {
        loop {
            let notified = self.upgrade_signal.notified();
            if self.upgraded.load(Ordering::SeqCst) {
                return Ok(());
            }
            if !self.is_connected() {
                return Err(Error::HandshakeFailure(
                    "connection closed during WebSocket upgrade".into(),
                ));
            }
            notified.await;
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match &self.inner {
            InnerClient::Tcp(client) => client.disconnect().await,
            InnerClient::Ssl(client) => client.disconnect().await,
        }
    }

    pub fn disconnect_async(&self) {
        match &self.inner {
            InnerClient::Tcp(client) => client.disconnect_async(),
            InnerClient::Ssl(client) => client.disconnect_async(),
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(OpCode::Text, text.as_bytes()).await
    }

    pub fn send_text_async(&self, text: &str) -> bool {
        self.send_frame_async(OpCode::Text, text.as_bytes())
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send_frame(OpCode::Binary, data).await
    }

    pub fn send_binary_async(&self, data: &[u8]) -> bool {
        self.send_frame_async(OpCode::Binary, data)
    }

    pub async fn send_ping(&self, payload: &[u8]) -> Result<()> {
        self.send_frame(OpCode::Ping, payload).await
    }

    pub async fn send_pong(&self, payload: &[u8]) -> Result<()> {
        self.send_frame(OpCode::Pong, payload).await
    }

    /// Send a close frame and begin a graceful disconnect.
    pub async fn send_close(&self, code: u16, reason: &str) -> Result<()> {
        self.sent_close.store(true, Ordering::SeqCst);
        let result = self
            .send_frame(OpCode::Close, &close_payload(code, reason))
            .await;
        self.disconnect_async();
        result
    }

    /// Client frames carry a fresh random mask each.
    async fn send_frame(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mut wire = Vec::with_capacity(payload.len() + 14);
        encode_frame(&mut wire, opcode, true, Some(random_mask()), payload);
        match &self.inner {
            InnerClient::Tcp(client) => client.send(&wire).await,
            InnerClient::Ssl(client) => client.send(&wire).await,
        }
    }

    fn send_frame_async(&self, opcode: OpCode, payload: &[u8]) -> bool {
        let mut wire = Vec::with_capacity(payload.len() + 14);
        encode_frame(&mut wire, opcode, true, Some(random_mask()), payload);
        self.send_raw_async(&wire)
    }

    fn send_raw_async(&self, data: &[u8]) -> bool {
        match &self.inner {
            InnerClient::Tcp(client) => client.send_async(data),
            InnerClient::Ssl(client) => client.send_async(data),
        }
    }

    fn echo_close(&self, code: Option<u16>) {
        if !self.sent_close.swap(true, Ordering::SeqCst) {
            self.send_frame_async(OpCode::Close, &close_payload(code.unwrap_or(1000), ""));
        }
    }

    fn feed(&self, data: &[u8]) -> ClientStep {
        let mut phase = self.phase.lock().unwrap();
        match &mut *phase {
            Phase::Upgrading { response, key } => match response.advance(data) {
                Ok((consumed, true)) => {
                    let response = std::mem::replace(response, HttpResponse::new());
                    match validate_upgrade_response(&response, key) {
                        Ok(()) => {
                            *phase =
                                Phase::Open(FrameDecoder::new(Role::Client, self.max_message_size));
                            ClientStep::Upgraded {
                                response,
                                leftover: data[consumed..].to_vec(),
                            }
                        }
                        Err(error) => ClientStep::Failed(error),
                    }
                }
                Ok((_, false)) => ClientStep::Pending,
                Err(error) => ClientStep::Failed(error),
            },
            Phase::Open(decoder) => match decoder.feed(data) {
                Ok(events) => ClientStep::Events(events),
                Err(error) => ClientStep::Failed(error),
            },
        }
    }

    async fn dispatch(self: &Arc<Self>, data: &[u8]) {
        let mut pending = data.to_vec();
        loop {
            match self.feed(&pending) {
                ClientStep::Pending => break,
                ClientStep::Upgraded { response, leftover } => {
                    self.upgraded.store(true, Ordering::SeqCst);
                    self.upgrade_signal.notify_waiters();
                    debug!(client = %self.id(), "WebSocket upgrade complete");
                    self.handler.on_ws_connected(self, &response).await;
                    if leftover.is_empty() {
                        break;
                    }
                    pending = leftover;
                }
                ClientStep::Events(events) => {
                    for event in events {
                        self.handle_event(event).await;
                    }
                    break;
                }
                ClientStep::Failed(error) => {
                    self.handler.on_error(error).await;
                    self.disconnect_async();
                    break;
                }
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: WsEvent) {
        match event {
            WsEvent::Message { opcode, payload } => {
                self.handler.on_ws_received(self, opcode, &payload).await;
            }
            WsEvent::Ping(payload) => {
                self.send_frame_async(OpCode::Pong, &payload);
                self.handler.on_ws_ping(self, &payload).await;
            }
            WsEvent::Pong(payload) => {
                self.handler.on_ws_pong(self, &payload).await;
            }
            WsEvent::Close { code, reason } => {
                self.echo_close(code);
                self.handler.on_ws_close(self, code, &reason).await;
                self.disconnect_async();
            }
        }
    }

    async fn closed(self: &Arc<Self>) {
        self.upgraded.store(false, Ordering::SeqCst);
        self.upgrade_signal.notify_waiters();
        self.handler.on_disconnected(self).await;
    }
}

/// Routes transport-level client events into the WebSocket layer; one
/// adapter serves both the plain-TCP and TLS flavors.
struct Adapter {
    client: Weak<WsClient>,
}

impl Adapter {
    fn client(&self) -> Option<Arc<WsClient>> {
        self.client.upgrade()
    }
}

#[async_trait]
impl ClientHandler<TcpClient> for Adapter {
    async fn on_connected(&self, _inner: &Arc<TcpClient>) {
        if let Some(client) = self.client() {
            client.handler.on_connected(&client).await;
        }
    }

    async fn on_received(&self, _inner: &Arc<TcpClient>, data: &[u8]) {
        if let Some(client) = self.client() {
            client.dispatch(data).await;
        }
    }

    async fn on_disconnected(&self, _inner: &Arc<TcpClient>) {
        if let Some(client) = self.client() {
            client.closed().await;
        }
    }

    async fn on_error(&self, error: Error) {
        if let Some(client) = self.client() {
            client.handler.on_error(error).await;
        }
    }
}

#[async_trait]
impl ClientHandler<SslClient> for Adapter {
    async fn on_connected(&self, _inner: &Arc<SslClient>) {
        if let Some(client) = self.client() {
            client.handler.on_connected(&client).await;
        }
    }

    async fn on_received(&self, _inner: &Arc<SslClient>, data: &[u8]) {
        if let Some(client) = self.client() {
            client.dispatch(data).await;
        }
    }

    async fn on_disconnected(&self, _inner: &Arc<SslClient>) {
        if let Some(client) = self.client() {
            client.closed().await;
        }
    }

    async fn on_error(&self, error: Error) {
        if let Some(client) = self.client() {
            client.handler.on_error(error).await;
        }
    }
}
