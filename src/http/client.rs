//! An HTTP/1.1 client over the TCP or TLS transport. Alongside the callback
//! surface it exposes a future-returning request API: `send_request`
//! resolves on the matching response or fails on timeout or disconnect.

use {
    async_trait::async_trait,
    std::collections::VecDeque,
    std::sync::{Arc, Mutex, Weak},
    std::time::Duration,
    tokio::sync::oneshot,
};

use crate::defaults;
use crate::error::{Error, Result};
use crate::handler::ClientHandler;
use crate::http::parser::ParseLimits;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::tcp::TcpClient;
use crate::tls::{SslClient, TlsClientContext};

#[async_trait]
pub trait HttpClientHandler: Send + Sync + 'static {
    async fn on_connected(&self, _client: &Arc<HttpClient>) {}

    async fn on_disconnected(&self, _client: &Arc<HttpClient>) {}

    /// A complete response arrived that no pending `send_request` call was
    /// waiting for.
    async fn on_received_response(&self, _client: &Arc<HttpClient>, _response: HttpResponse) {}

    /// A malformed response arrived; the connection is closed right after
    /// this returns.
    async fn on_received_response_error(
        &self,
        _client: &Arc<HttpClient>,
        _response: HttpResponse,
        _error: Error,
    ) {
    }

    async fn on_error(&self, _error: Error) {}
}

/// A handler that ignores every HTTP client event; the default when only the
/// future-returning API is used.
pub struct NopHttpClientHandler;

#[async_trait]
impl HttpClientHandler for NopHttpClientHandler {}

enum InnerClient {
    Tcp(Arc<TcpClient>),
    Ssl(Arc<SslClient>),
}

pub struct HttpClient {
    inner: InnerClient,
    handler: Arc<dyn HttpClientHandler>,
    parser: Mutex<HttpResponse>,
    limits: ParseLimits,
    waiters: Mutex<VecDeque<oneshot::Sender<Result<HttpResponse>>>>,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        handler: Arc<dyn HttpClientHandler>,
        options: StreamOptions,
    ) -> Arc<HttpClient> {
        let host = host.into();
        Arc::new_cyclic(|client: &Weak<HttpClient>| {
            let adapter = Arc::new(Adapter {
                client: client.clone(),
            });
            HttpClient {
                inner: InnerClient::Tcp(TcpClient::new(host, port, adapter, options)),
                handler,
                parser: Mutex::new(HttpResponse::with_limits(ParseLimits::default())),
                limits: ParseLimits::default(),
                waiters: Mutex::new(VecDeque::new()),
                request_timeout: defaults::request_timeout(),
            }
        })
    }

    /// An HTTPS client: the same protocol machinery over the TLS transport.
    pub fn new_tls(
        host: impl Into<String>,
        port: u16,
        context: TlsClientContext,
        handler: Arc<dyn HttpClientHandler>,
        options: StreamOptions,
    ) -> Arc<HttpClient> {
        let host = host.into();
        Arc::new_cyclic(|client: &Weak<HttpClient>| {
            let adapter = Arc::new(Adapter {
                client: client.clone(),
            });
            HttpClient {
                inner: InnerClient::Ssl(SslClient::new(host, port, context, adapter, options)),
                handler,
                parser: Mutex::new(HttpResponse::with_limits(ParseLimits::default())),
                limits: ParseLimits::default(),
                waiters: Mutex::new(VecDeque::new()),
                request_timeout: defaults::request_timeout(),
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

    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        match &self.inner {
            InnerClient::Tcp(client) => client.connect().await,
            InnerClient::Ssl(client) => client.connect().await,
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match &self.inner {
            InnerClient::Tcp(client) => client.disconnect().await,
            InnerClient::Ssl(client) => client.disconnect().await,
        }
    }

    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        match &self.inner {
            InnerClient::Tcp(client) => client.reconnect().await,
            InnerClient::Ssl(client) => client.reconnect().await,
        }
    }

    /// Enqueue a prebuilt request without waiting for the response; the
    /// response surfaces through the handler.
    pub fn send_request_async(&self, request: &HttpRequest) -> bool {
        match &self.inner {
            InnerClient::Tcp(client) => client.send_async(request.cache()),
            InnerClient::Ssl(client) => client.send_async(request.cache()),
        }
    }

    /// Send a request and resolve on the matching response, connecting first
    /// when necessary. Responses are matched to requests in send order.
    /// Fails with [`Error::TimedOut`] after the request timeout, closing the
    /// connection since the response stream is ambiguous from then on.
    pub async fn send_request(self: &Arc<Self>, request: &HttpRequest) -> Result<HttpResponse> {
        if !self.is_connected() {
            self.connect().await?;
        }
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock().unwrap().push_back(sender);
        let sent = match &self.inner {
            InnerClient::Tcp(client) => client.send(request.cache()).await,
            InnerClient::Ssl(client) => client.send(request.cache()).await,
        };
        if let Err(error) = sent {
            self.waiters.lock().unwrap().pop_back();
            return Err(error);
        }
        match tokio::time::timeout(self.request_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.disconnect_async();
                Err(Error::TimedOut)
            }
        }
    }

    fn disconnect_async(&self) {
        match &self.inner {
            InnerClient::Tcp(client) => client.disconnect_async(),
            InnerClient::Ssl(client) => client.disconnect_async(),
        }
    }

    async fn dispatch(self: &Arc<Self>, data: &[u8]) {
        let mut rest = data;
        loop {
            let step = {
                let mut parser = self.parser.lock().unwrap();
                match parser.advance(rest) {
                    Ok((consumed, true)) => {
                        let response = std::mem::replace(
                            &mut *parser,
                            HttpResponse::with_limits(self.limits),
                        );
                        Ok((consumed, Some(response)))
                    }
                    Ok((consumed, false)) => Ok((consumed, None)),
                    Err(error) => {
                        let response = std::mem::replace(
                            &mut *parser,
                            HttpResponse::with_limits(self.limits),
                        );
                        Err((response, error))
                    }
                }
            };
            match step {
                Ok((consumed, Some(response))) => {
                    rest = &rest[consumed..];
                    self.deliver(response).await;
                    if rest.is_empty() {
                        break;
                    }
                }
                Ok((_, None)) => break,
                Err((response, error)) => {
                    self.handler
                        .on_received_response_error(self, response, error)
                        .await;
                    self.disconnect_async();
                    break;
                }
            }
        }
    }

    async fn deliver(self: &Arc<Self>, response: HttpResponse) {
        let waiter = self.waiters.lock().unwrap().pop_front();
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(Ok(response));
            }
            None => self.handler.on_received_response(self, response).await,
        }
    }

    async fn closed(self: &Arc<Self>) {
        let waiters: Vec<_> = self.waiters.lock().unwrap().drain(..).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(Error::NotConnected));
        }
        self.handler.on_disconnected(self).await;
    }
}

/// Routes transport-level client events into the HTTP layer; one adapter
/// serves both the plain-TCP and TLS flavors.
struct Adapter {
    client: Weak<HttpClient>,
}

impl Adapter {
    fn client(&self) -> Option<Arc<HttpClient>> {
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
