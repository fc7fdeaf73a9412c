//! A WebSocket server over the TCP or TLS transport: validates HTTP
//! upgrades, then exchanges frames with every accepted session.

use tracing::debug;
use {
    async_trait::async_trait,
    std::collections::HashMap,
    std::net::SocketAddr,
    std::sync::{Arc, RwLock, Weak},
};

use crate::defaults;
use crate::error::{Error, Result};
use crate::handler::ServerHandler;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::http::session::SessionTransport;
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::tcp::{TcpServer, TcpSession};
use crate::tls::{SslServer, SslSession, TlsServerContext};
use crate::ws::frame::{encode_frame, OpCode, WsEvent};
use crate::ws::handshake::{make_upgrade_response, validate_upgrade_request};
use crate::ws::session::{Step, WsSession};

#[async_trait]
pub trait WsServerHandler: Send + Sync + 'static {
    async fn on_started(&self) {}

    async fn on_stopped(&self) {}

    /// The upgrade request validated; veto by returning `false` (the
    /// prepared `101` response may be customized with extra headers first).
    async fn on_ws_connecting(
        &self,
        _session: &Arc<WsSession>,
        _request: &HttpRequest,
        _response: &mut HttpResponse,
    ) -> bool {
        true
    }

    /// The upgrade completed; frame traffic is live.
    async fn on_ws_connected(&self, _session: &Arc<WsSession>, _request: &HttpRequest) {}

    /// One complete message (text or binary) was reassembled.
    async fn on_ws_received(&self, _session: &Arc<WsSession>, _opcode: OpCode, _payload: &[u8]) {}

    /// A ping arrived; the pong echo has already been queued.
    async fn on_ws_ping(&self, _session: &Arc<WsSession>, _payload: &[u8]) {}

    async fn on_ws_pong(&self, _session: &Arc<WsSession>, _payload: &[u8]) {}

    /// The peer sent a close frame; the echo has been queued and the session
    /// is disconnecting.
    async fn on_ws_close(&self, _session: &Arc<WsSession>, _code: Option<u16>, _reason: &[u8]) {}

    async fn on_ws_disconnected(&self, _session: &Arc<WsSession>) {}

    async fn on_error(&self, _error: Error) {}
}

enum InnerServer {
    Tcp(Arc<TcpServer>),
    Ssl(Arc<SslServer>),
}

pub struct WsServer {
    inner: InnerServer,
    handler: Arc<dyn WsServerHandler>,
    sessions: RwLock<HashMap<EndpointId, Arc<WsSession>>>,
    max_message_size: usize,
}

impl WsServer {
    pub fn new(
        address: SocketAddr,
        handler: Arc<dyn WsServerHandler>,
        options: StreamOptions,
    ) -> Arc<WsServer> {
        Arc::new_cyclic(|server: &Weak<WsServer>| {
            let adapter = Arc::new(Adapter {
                server: server.clone(),
            });
            WsServer {
                inner: InnerServer::Tcp(TcpServer::new(address, adapter, options)),
                handler,
                sessions: RwLock::new(HashMap::new()),
                max_message_size: defaults::max_ws_message_size(),
            }
        })
    }

    /// A `wss://` server: the same upgrade and framing over TLS.
    pub fn new_tls(
        address: SocketAddr,
        context: TlsServerContext,
        handler: Arc<dyn WsServerHandler>,
        options: StreamOptions,
    ) -> Arc<WsServer> {
        Arc::new_cyclic(|server: &Weak<WsServer>| {
            let adapter = Arc::new(Adapter {
                server: server.clone(),
            });
            WsServer {
                inner: InnerServer::Ssl(SslServer::new(address, context, adapter, options)),
                handler,
                sessions: RwLock::new(HashMap::new()),
                max_message_size: defaults::max_ws_message_size(),
            }
        })
    }

    pub fn is_started(&self) -> bool {
        match &self.inner {
            InnerServer::Tcp(server) => server.is_started(),
            InnerServer::Ssl(server) => server.is_started(),
        }
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        match &self.inner {
            InnerServer::Tcp(server) => server.local_address(),
            InnerServer::Ssl(server) => server.local_address(),
        }
    }

    pub fn connected_sessions(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        match &self.inner {
            InnerServer::Tcp(server) => server.start().await,
            InnerServer::Ssl(server) => server.start().await,
        }
    }

    pub async fn stop(&self) -> Result<()> {
        match &self.inner {
            InnerServer::Tcp(server) => server.stop().await,
            InnerServer::Ssl(server) => server.stop().await,
        }
    }

    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    pub async fn disconnect_all(&self) {
        match &self.inner {
            InnerServer::Tcp(server) => server.disconnect_all().await,
            InnerServer::Ssl(server) => server.disconnect_all().await,
        }
    }

    /// Fan a text message out to every handshaked session. Per-session
    /// back-pressure may drop individual enqueues.
    pub fn multicast_text(&self, text: &str) -> bool {
        self.multicast_frame(OpCode::Text, text.as_bytes())
    }

    pub fn multicast_binary(&self, data: &[u8]) -> bool {
        self.multicast_frame(OpCode::Binary, data)
    }

    fn multicast_frame(&self, opcode: OpCode, payload: &[u8]) -> bool {
        if !self.is_started() {
            return false;
        }
        let mut wire = Vec::with_capacity(payload.len() + 10);
        encode_frame(&mut wire, opcode, true, None, payload);
        let sessions: Vec<Arc<WsSession>> =
            self.sessions.read().unwrap().values().cloned().collect();
        for session in sessions {
            if session.is_handshaked() {
                session.send_raw_async(&wire);
            }
        }
        true
    }

    /// Sessions currently registered, snapshotted so no lock is held during
    /// iteration or I/O.
    pub fn snapshot(&self) -> Vec<Arc<WsSession>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    pub fn find_session(&self, id: EndpointId) -> Option<Arc<WsSession>> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    async fn attach(&self, transport: SessionTransport) {
        let session = Arc::new(WsSession::new(transport, self.max_message_size));
        self.sessions
            .write()
            .unwrap()
            .insert(session.id(), session);
    }

    async fn detach(&self, id: EndpointId) {
        let session = self.sessions.write().unwrap().remove(&id);
        if let Some(session) = session {
            self.handler.on_ws_disconnected(&session).await;
        }
    }

    async fn dispatch(&self, id: EndpointId, data: &[u8]) {
        let session = match self.find_session(id) {
            Some(session) => session,
            None => return,
        };
        let mut pending = data.to_vec();
        loop {
            match session.feed(&pending) {
                Step::Pending => break,
                Step::Upgraded { request, leftover } => {
                    match validate_upgrade_request(&request) {
                        Ok(upgrade) => {
                            let mut response = make_upgrade_response(
                                &upgrade.key,
                                upgrade.subprotocol.as_deref(),
                            );
                            let accepted = self
                                .handler
                                .on_ws_connecting(&session, &request, &mut response)
                                .await;
                            if !accepted {
                                let refusal =
                                    HttpResponse::make_error_response(400, "upgrade refused");
                                session.send_raw_async(refusal.cache());
                                session.disconnect_async();
                                return;
                            }
                            session.send_raw_async(response.cache());
                            session.open();
                            debug!(session = %session.id(), "WebSocket upgrade complete");
                            self.handler.on_ws_connected(&session, &request).await;
                            if leftover.is_empty() {
                                break;
                            }
                            pending = leftover;
                        }
                        Err(error) => {
                            let refusal = HttpResponse::make_error_response(400, "bad request");
                            session.send_raw_async(refusal.cache());
                            self.handler.on_error(error).await;
                            session.disconnect_async();
                            return;
                        }
                    }
                }
                Step::Events(events) => {
                    for event in events {
                        self.handle_event(&session, event).await;
                    }
                    break;
                }
                Step::Failed(error) => {
                    self.handler.on_error(error).await;
                    session.disconnect_async();
                    return;
                }
            }
        }
    }

    async fn handle_event(&self, session: &Arc<WsSession>, event: WsEvent) {
        match event {
            WsEvent::Message { opcode, payload } => {
                self.handler
                    .on_ws_received(session, opcode, &payload)
                    .await;
            }
            WsEvent::Ping(payload) => {
                session.send_pong_async(&payload);
                self.handler.on_ws_ping(session, &payload).await;
            }
            WsEvent::Pong(payload) => {
                self.handler.on_ws_pong(session, &payload).await;
            }
            WsEvent::Close { code, reason } => {
                session.echo_close(code);
                self.handler.on_ws_close(session, code, &reason).await;
                session.disconnect_async();
            }
        }
    }
}

/// Routes transport-level session events into the WebSocket layer; one
/// adapter serves both the plain-TCP and TLS flavors.
struct Adapter {
    server: Weak<WsServer>,
}

impl Adapter {
    fn server(&self) -> Option<Arc<WsServer>> {
        self.server.upgrade()
    }
}

#[async_trait]
impl ServerHandler<TcpSession> for Adapter {
    async fn on_started(&self) {
        if let Some(server) = self.server() {
            server.handler.on_started().await;
        }
    }

    async fn on_stopped(&self) {
        if let Some(server) = self.server() {
            server.handler.on_stopped().await;
        }
    }

    async fn on_connected(&self, session: &Arc<TcpSession>) {
        if let Some(server) = self.server() {
            server.attach(SessionTransport::Tcp(session.clone())).await;
        }
    }

    async fn on_received(&self, session: &Arc<TcpSession>, data: &[u8]) {
        if let Some(server) = self.server() {
            server.dispatch(session.id(), data).await;
        }
    }

    async fn on_disconnected(&self, session: &Arc<TcpSession>) {
        if let Some(server) = self.server() {
            server.detach(session.id()).await;
        }
    }

    async fn on_error(&self, error: Error) {
        if let Some(server) = self.server() {
            server.handler.on_error(error).await;
        }
    }
}

#[async_trait]
impl ServerHandler<SslSession> for Adapter {
    async fn on_started(&self) {
        if let Some(server) = self.server() {
            server.handler.on_started().await;
        }
    }

    async fn on_stopped(&self) {
        if let Some(server) = self.server() {
            server.handler.on_stopped().await;
        }
    }

    async fn on_connected(&self, session: &Arc<SslSession>) {
        if let Some(server) = self.server() {
            server.attach(SessionTransport::Ssl(session.clone())).await;
        }
    }

    async fn on_received(&self, session: &Arc<SslSession>, data: &[u8]) {
        if let Some(server) = self.server() {
            server.dispatch(session.id(), data).await;
        }
    }

    async fn on_disconnected(&self, session: &Arc<SslSession>) {
        if let Some(server) = self.server() {
            server.detach(session.id()).await;
        }
    }

    async fn on_error(&self, error: Error) {
        if let Some(server) = self.server() {
            server.handler.on_error(error).await;
        }
    }
}
