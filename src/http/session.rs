//! A server-side HTTP session: a TCP or TLS session driving the request
//! parser across receives.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::http::parser::ParseLimits;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::id::EndpointId;
use crate::tcp::TcpSession;
use crate::tls::SslSession;

/// The underlying stream session an HTTP (or WebSocket) session is layered
/// on.
pub(crate) enum SessionTransport {
    Tcp(Arc<TcpSession>),
    Ssl(Arc<SslSession>),
}

impl SessionTransport {
    pub fn id(&self) -> EndpointId {
        match self {
            SessionTransport::Tcp(session) => session.id(),
            SessionTransport::Ssl(session) => session.id(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            SessionTransport::Tcp(session) => session.is_connected(),
            SessionTransport::Ssl(session) => session.is_connected(),
        }
    }

    pub fn send_async(&self, data: &[u8]) -> bool {
        match self {
            SessionTransport::Tcp(session) => session.send_async(data),
            SessionTransport::Ssl(session) => session.send_async(data),
        }
    }

    pub async fn send(&self, data: &[u8]) -> Result<()> {
        match self {
            SessionTransport::Tcp(session) => session.send(data).await,
            SessionTransport::Ssl(session) => session.send(data).await,
        }
    }

    pub fn disconnect_async(&self) {
        match self {
            SessionTransport::Tcp(session) => session.disconnect_async(),
            SessionTransport::Ssl(session) => session.disconnect_async(),
        }
    }

    pub fn abort(&self) {
        match self {
            SessionTransport::Tcp(session) => session.abort(),
            SessionTransport::Ssl(session) => session.abort(),
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        match self {
            SessionTransport::Tcp(session) => session.bytes_sent(),
            SessionTransport::Ssl(session) => session.bytes_sent(),
        }
    }

    pub fn bytes_received(&self) -> u64 {
        match self {
            SessionTransport::Tcp(session) => session.bytes_received(),
            SessionTransport::Ssl(session) => session.bytes_received(),
        }
    }

    pub fn bytes_pending(&self) -> u64 {
        match self {
            SessionTransport::Tcp(session) => session.bytes_pending(),
            SessionTransport::Ssl(session) => session.bytes_pending(),
        }
    }

    /// Mark the application-level handshake (WebSocket upgrade) complete.
    pub fn set_handshaked(&self) {
        match self {
            SessionTransport::Tcp(session) => session.core().set_handshaked(),
            SessionTransport::Ssl(session) => session.core().set_handshaked(),
        }
    }
}

pub struct HttpSession {
    transport: SessionTransport,
    parser: Mutex<HttpRequest>,
    limits: ParseLimits,
}

impl HttpSession {
    pub(crate) fn new(transport: SessionTransport, limits: ParseLimits) -> HttpSession {
        HttpSession {
            transport,
            parser: Mutex::new(HttpRequest::with_limits(limits)),
            limits,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.transport.id()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.transport.bytes_sent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.transport.bytes_received()
    }

    pub fn bytes_pending(&self) -> u64 {
        self.transport.bytes_pending()
    }

    /// Send a prebuilt response, awaiting queue capacity.
    pub async fn send_response(&self, response: &HttpResponse) -> Result<()> {
        self.transport.send(response.cache()).await
    }

    /// Non-blocking send of a prebuilt response; `false` signals
    /// back-pressure.
    pub fn send_response_async(&self, response: &HttpResponse) -> bool {
        self.transport.send_async(response.cache())
    }

    /// Non-blocking send of already-serialized response bytes (cache hits).
    pub(crate) fn send_response_async_raw(&self, data: &[u8]) -> bool {
        self.transport.send_async(data)
    }

    pub fn disconnect_async(&self) {
        self.transport.disconnect_async();
    }

    pub fn abort(&self) {
        self.transport.abort();
    }

    /// Drive the request parser over newly received bytes, returning every
    /// request completed by them. On a malformed request the partially
    /// parsed message comes back with the error so diagnostics can surface
    /// it; parser state resets either way.
    pub(crate) fn feed(
        &self,
        data: &[u8],
    ) -> std::result::Result<Vec<HttpRequest>, (HttpRequest, Error)> {
        let mut parser = self.parser.lock().unwrap();
        let mut completed = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            match parser.advance(rest) {
                Ok((consumed, true)) => {
                    let request =
                        std::mem::replace(&mut *parser, HttpRequest::with_limits(self.limits));
                    completed.push(request);
                    rest = &rest[consumed..];
                }
                Ok((consumed, false)) => {
                    debug_assert_eq!(consumed, rest.len());
                    break;
                }
                Err(error) => {
                    let request =
                        std::mem::replace(&mut *parser, HttpRequest::with_limits(self.limits));
                    return Err((request, error));
                }
            }
        }
        Ok(completed)
    }
}
