//! An HTTP/1.1 server over the TCP or TLS transport. GET requests matching
//! the response cache are served directly from cached bytes; everything else
//! reaches the handler.

use tracing::warn;
use {
    async_trait::async_trait,
    std::collections::HashMap,
    std::net::SocketAddr,
    std::path::PathBuf,
    std::sync::{Arc, Mutex, RwLock, Weak},
    std::time::Duration,
    tokio::sync::mpsc,
    tokio::task::JoinHandle,
};

use crate::defaults;
use crate::error::{Error, Result};
use crate::handler::ServerHandler;
use crate::http::cache::{ResponseCache, StaticRoot};
use crate::http::parser::ParseLimits;
use crate::http::request::HttpRequest;
use crate::http::session::{HttpSession, SessionTransport};
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::tcp::{TcpServer, TcpSession};
use crate::tls::{SslServer, SslSession, TlsServerContext};

#[async_trait]
pub trait HttpServerHandler: Send + Sync + 'static {
    async fn on_started(&self) {}

    async fn on_stopped(&self) {}

    async fn on_connected(&self, _session: &Arc<HttpSession>) {}

    async fn on_disconnected(&self, _session: &Arc<HttpSession>) {}

    /// A complete, well-formed request arrived.
    async fn on_received_request(&self, _session: &Arc<HttpSession>, _request: HttpRequest) {}

    /// A malformed request arrived; the connection is closed right after
    /// this returns.
    async fn on_received_request_error(
        &self,
        _session: &Arc<HttpSession>,
        _request: HttpRequest,
        _error: Error,
    ) {
    }

    async fn on_error(&self, _error: Error) {}
}

enum InnerServer {
    Tcp(Arc<TcpServer>),
    Ssl(Arc<SslServer>),
}

pub struct HttpServer {
    inner: InnerServer,
    handler: Arc<dyn HttpServerHandler>,
    cache: ResponseCache,
    limits: Mutex<ParseLimits>,
    sessions: RwLock<HashMap<EndpointId, Arc<HttpSession>>>,
    statics: Arc<Mutex<Vec<StaticRoot>>>,
    rescan: Mutex<Option<(mpsc::Sender<()>, JoinHandle<()>)>>,
}

impl HttpServer {
    pub fn new(
        address: SocketAddr,
        handler: Arc<dyn HttpServerHandler>,
        options: StreamOptions,
    ) -> Arc<HttpServer> {
        Arc::new_cyclic(|server: &Weak<HttpServer>| {
            let adapter = Arc::new(Adapter {
                server: server.clone(),
            });
            HttpServer {
                inner: InnerServer::Tcp(TcpServer::new(address, adapter, options)),
                handler,
                cache: ResponseCache::new(),
                limits: Mutex::new(ParseLimits::default()),
                sessions: RwLock::new(HashMap::new()),
                statics: Arc::new(Mutex::new(Vec::new())),
                rescan: Mutex::new(None),
            }
        })
    }

    /// An HTTPS server: the same protocol machinery over the TLS transport.
    pub fn new_tls(
        address: SocketAddr,
        context: TlsServerContext,
        handler: Arc<dyn HttpServerHandler>,
        options: StreamOptions,
    ) -> Arc<HttpServer> {
        Arc::new_cyclic(|server: &Weak<HttpServer>| {
            let adapter = Arc::new(Adapter {
                server: server.clone(),
            });
            HttpServer {
                inner: InnerServer::Ssl(SslServer::new(address, context, adapter, options)),
                handler,
                cache: ResponseCache::new(),
                limits: Mutex::new(ParseLimits::default()),
                sessions: RwLock::new(HashMap::new()),
                statics: Arc::new(Mutex::new(Vec::new())),
                rescan: Mutex::new(None),
            }
        })
    }

    /// Replace the parser limits applied to sessions accepted from now on.
    pub fn set_limits(&self, limits: ParseLimits) {
        *self.limits.lock().unwrap() = limits;
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
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
            InnerServer::Tcp(server) => server.start().await?,
            InnerServer::Ssl(server) => server.start().await?,
        }
        self.spawn_rescan();
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let rescan = self.rescan.lock().unwrap().take();
        if let Some((stop, task)) = rescan {
            let _ = stop.send(()).await;
            let _ = task.await;
        }
        match &self.inner {
            InnerServer::Tcp(server) => server.stop().await,
            InnerServer::Ssl(server) => server.stop().await,
        }
    }

    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Enqueue raw bytes to every connected session.
    pub fn multicast(&self, data: &[u8]) -> bool {
        match &self.inner {
            InnerServer::Tcp(server) => server.multicast(data),
            InnerServer::Ssl(server) => server.multicast(data),
        }
    }

    pub async fn disconnect_all(&self) {
        match &self.inner {
            InnerServer::Tcp(server) => server.disconnect_all().await,
            InnerServer::Ssl(server) => server.disconnect_all().await,
        }
    }

    /// Recursively load a directory tree into the response cache, serving
    /// each file under `prefix`. Changed files are picked up by a periodic
    /// rescan while the server runs.
    pub fn add_static_content(
        &self,
        path: impl Into<PathBuf>,
        prefix: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut root = StaticRoot::new(path.into(), prefix.to_string(), ttl);
        root.refresh(&self.cache)?;
        self.statics.lock().unwrap().push(root);
        Ok(())
    }

    fn spawn_rescan(self: &Arc<Self>) {
        let mut guard = self.rescan.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let (stop, mut stop_rx) = mpsc::channel::<()>(1);
        let server = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(defaults::cache_rescan_interval());
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stop_rx.recv() => break,
                }
                let server = match server.upgrade() {
                    Some(server) => server,
                    None => break,
                };
                let mut statics = server.statics.lock().unwrap();
                for root in statics.iter_mut() {
                    if let Err(error) = root.refresh(&server.cache) {
                        warn!(%error, "static content rescan failed");
                    }
                }
            }
        });
        *guard = Some((stop, task));
    }

    fn find_http_session(&self, id: EndpointId) -> Option<Arc<HttpSession>> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    async fn attach(&self, transport: SessionTransport) {
        let limits = *self.limits.lock().unwrap();
        let session = Arc::new(HttpSession::new(transport, limits));
        self.sessions
            .write()
            .unwrap()
            .insert(session.id(), session.clone());
        self.handler.on_connected(&session).await;
    }

    async fn detach(&self, id: EndpointId) {
        let session = self.sessions.write().unwrap().remove(&id);
        if let Some(session) = session {
            self.handler.on_disconnected(&session).await;
        }
    }

    async fn dispatch(&self, id: EndpointId, data: &[u8]) {
        let session = match self.find_http_session(id) {
            Some(session) => session,
            None => return,
        };
        match session.feed(data) {
            Ok(requests) => {
                for request in requests {
                    // Cached GETs are answered without reparsing or user
                    // involvement.
                    if request.method() == "GET" {
                        if let Some(cached) = self.cache.find(request.url()) {
                            session.send_response_async_raw(&cached);
                            continue;
                        }
                    }
                    self.handler.on_received_request(&session, request).await;
                }
            }
            Err((request, error)) => {
                self.handler
                    .on_received_request_error(&session, request, error)
                    .await;
                session.disconnect_async();
            }
        }
    }
}

/// Routes transport-level session events into the HTTP layer. One adapter
/// serves both the plain-TCP and TLS flavors.
struct Adapter {
    server: Weak<HttpServer>,
}

impl Adapter {
    fn server(&self) -> Option<Arc<HttpServer>> {
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
