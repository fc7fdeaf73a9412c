//! A server-side WebSocket session: an HTTP upgrade in progress, then frame
//! exchange on the same connection.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use crate::error::{Error, Result};
use crate::http::request::HttpRequest;
use crate::http::session::SessionTransport;
use crate::id::EndpointId;
use crate::ws::frame::{close_payload, encode_frame, FrameDecoder, OpCode, Role, WsEvent};

enum Phase {
    Upgrading(HttpRequest),
    Open(FrameDecoder),
}

/// What one batch of inbound bytes produced, handed back to the server for
/// callback dispatch outside the session lock.
pub(crate) enum Step {
    Pending,
    Upgraded {
        request: HttpRequest,
        leftover: Vec<u8>,
    },
    Events(Vec<WsEvent>),
    Failed(Error),
}

pub struct WsSession {
    transport: SessionTransport,
    phase: Mutex<Phase>,
    sent_close: AtomicBool,
    max_message_size: usize,
}

impl WsSession {
    pub(crate) fn new(transport: SessionTransport, max_message_size: usize) -> WsSession {
        WsSession {
            transport,
            phase: Mutex::new(Phase::Upgrading(HttpRequest::new())),
            sent_close: AtomicBool::new(false),
            max_message_size,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.transport.id()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// True once the upgrade response went out and frame traffic is live.
    pub fn is_handshaked(&self) -> bool {
        matches!(*self.phase.lock().unwrap(), Phase::Open(_))
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

    pub fn send_ping_async(&self, payload: &[u8]) -> bool {
        self.send_frame_async(OpCode::Ping, payload)
    }

    pub async fn send_pong(&self, payload: &[u8]) -> Result<()> {
        self.send_frame(OpCode::Pong, payload).await
    }

    pub fn send_pong_async(&self, payload: &[u8]) -> bool {
        self.send_frame_async(OpCode::Pong, payload)
    }

    /// Send a close frame and begin a graceful disconnect.
    pub async fn send_close(&self, code: u16, reason: &str) -> Result<()> {
        self.sent_close.store(true, Ordering::SeqCst);
        let result = self
            .send_frame(OpCode::Close, &close_payload(code, reason))
            .await;
        self.transport.disconnect_async();
        result
    }

    pub fn disconnect_async(&self) {
        self.transport.disconnect_async();
    }

    pub fn abort(&self) {
        self.transport.abort();
    }

    async fn send_frame(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mut wire = Vec::with_capacity(payload.len() + 10);
        encode_frame(&mut wire, opcode, true, None, payload);
        self.transport.send(&wire).await
    }

    fn send_frame_async(&self, opcode: OpCode, payload: &[u8]) -> bool {
        let mut wire = Vec::with_capacity(payload.len() + 10);
        encode_frame(&mut wire, opcode, true, None, payload);
        self.transport.send_async(&wire)
    }

    /// Send already-serialized bytes (upgrade responses, multicast frames).
    pub(crate) fn send_raw_async(&self, data: &[u8]) -> bool {
        self.transport.send_async(data)
    }

    /// Echo an incoming close exactly once.
    pub(crate) fn echo_close(&self, code: Option<u16>) -> bool {
        if self.sent_close.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.send_frame_async(OpCode::Close, &close_payload(code.unwrap_or(1000), ""))
    }

    /// Consume inbound bytes under the phase lock; callbacks happen in the
    /// server afterwards.
    pub(crate) fn feed(&self, data: &[u8]) -> Step {
        let mut phase = self.phase.lock().unwrap();
        match &mut *phase {
            Phase::Upgrading(request) => match request.advance(data) {
                Ok((consumed, true)) => {
                    let request = std::mem::replace(request, HttpRequest::new());
                    Step::Upgraded {
                        request,
                        leftover: data[consumed..].to_vec(),
                    }
                }
                Ok((_, false)) => Step::Pending,
                Err(error) => Step::Failed(error),
            },
            Phase::Open(decoder) => match decoder.feed(data) {
                Ok(events) => Step::Events(events),
                Err(error) => Step::Failed(error),
            },
        }
    }

    /// Switch to frame exchange after the 101 response went out.
    pub(crate) fn open(&self) {
        *self.phase.lock().unwrap() =
            Phase::Open(FrameDecoder::new(Role::Server, self.max_message_size));
        self.transport.set_handshaked();
    }
}
