//! Connection-independent machinery shared by every stream endpoint: the
//! lifecycle state machine, byte counters, the two-buffer swap send queue,
//! and the per-connection receive/send pumps.
//!
//! The send discipline keeps at most one OS write outstanding per
//! connection: user code appends to the `main` buffer under a short-held
//! mutex, while the send pump exclusively owns the `flush` buffer it is
//! writing from. When a write completes and `main` is non-empty the two are
//! swapped and the pump re-posts. The mutex is never held across I/O.

use tracing::debug;
use {
    async_trait::async_trait,
    std::sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex,
    },
    std::time::{Duration, Instant},
    tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    tokio::sync::Notify,
    tokio::task::JoinHandle,
};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::stream::io::IoStream;
use crate::utils::{format_duration, format_size};

/// Lifecycle of a stream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    Connecting = 1,
    Handshaking = 2,
    Connected = 3,
    Disconnecting = 4,
    Disconnected = 5,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Idle,
            1 => State::Connecting,
            2 => State::Handshaking,
            3 => State::Connected,
            4 => State::Disconnecting,
            _ => State::Disconnected,
        }
    }
}

const CLOSE_OPEN: u8 = 0;
const CLOSE_GRACEFUL: u8 = 1;
const CLOSE_HARD: u8 = 2;

/// Internal event sink the pumps deliver into. Each endpoint flavor bridges
/// these to its public handler trait.
#[async_trait]
pub(crate) trait StreamCallbacks: Send + Sync + 'static {
    async fn on_received(&self, data: &[u8]);
    async fn on_sent(&self, sent: u64, pending: u64);
    async fn on_empty(&self);
    async fn on_error(&self, error: Error);
    /// Both pumps have exited and the state is `Disconnected`. Fired exactly
    /// once per connection.
    async fn on_closed(&self);
}

/// Per-connection state shared between user-facing endpoint objects and the
/// pumps.
pub(crate) struct StreamCore {
    id: EndpointId,
    options: StreamOptions,
    state: AtomicU8,
    handshaked: AtomicBool,
    close_mode: AtomicU8,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_pending: AtomicU64,
    bytes_sending: AtomicU64,
    /// The `main` half of the swap pair. The `flush` half lives inside the
    /// send pump.
    queue: Mutex<Buffer>,
    send_signal: Notify,
    drain_signal: Notify,
    close_signal: Notify,
    disconnected_signal: Notify,
}

impl StreamCore {
    pub fn new(options: StreamOptions) -> Arc<StreamCore> {
        Arc::new(StreamCore {
            id: EndpointId::random(),
            options,
            state: AtomicU8::new(State::Idle as u8),
            handshaked: AtomicBool::new(false),
            close_mode: AtomicU8::new(CLOSE_OPEN),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_pending: AtomicU64::new(0),
            bytes_sending: AtomicU64::new(0),
            queue: Mutex::new(Buffer::new()),
            send_signal: Notify::new(),
            drain_signal: Notify::new(),
            close_signal: Notify::new(),
            disconnected_signal: Notify::new(),
        })
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), State::Connected | State::Handshaking)
    }

    pub fn is_handshaked(&self) -> bool {
        self.handshaked.load(Ordering::SeqCst)
    }

    pub fn set_handshaked(&self) {
        self.handshaked.store(true, Ordering::SeqCst);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::SeqCst)
    }

    pub fn bytes_pending(&self) -> u64 {
        self.bytes_pending.load(Ordering::SeqCst)
    }

    pub fn bytes_sending(&self) -> u64 {
        self.bytes_sending.load(Ordering::SeqCst)
    }

    fn close_mode(&self) -> u8 {
        self.close_mode.load(Ordering::SeqCst)
    }

    /// Claim the core for a fresh connection attempt, moving `Idle` or
    /// `Disconnected` to `Connecting` and clearing queue and counters.
    /// Returns `false` when a connection is already underway, leaving all
    /// state untouched.
    pub fn begin_connect(&self) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            match State::from_u8(current) {
                State::Idle | State::Disconnected => {}
                _ => return false,
            }
            match self.state.compare_exchange(
                current,
                State::Connecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.queue.lock().unwrap().clear();
        self.close_mode.store(CLOSE_OPEN, Ordering::SeqCst);
        self.handshaked.store(false, Ordering::SeqCst);
        self.bytes_sent.store(0, Ordering::SeqCst);
        self.bytes_received.store(0, Ordering::SeqCst);
        self.bytes_pending.store(0, Ordering::SeqCst);
        self.bytes_sending.store(0, Ordering::SeqCst);
        true
    }

    /// Request the connection to close. A graceful close drains queued
    /// outbound bytes first; a hard close aborts the in-flight write and
    /// drops the socket. Hard wins if both are requested.
    pub fn close(&self, hard: bool) {
        let mode = if hard { CLOSE_HARD } else { CLOSE_GRACEFUL };
        self.close_mode.fetch_max(mode, Ordering::SeqCst);
        if self.is_connected() {
            self.set_state(State::Disconnecting);
        }
        self.close_signal.notify_waiters();
        self.send_signal.notify_waiters();
        self.drain_signal.notify_waiters();
    }

    /// Resolves once any close has been requested. Used to interrupt
    /// handshakes that run before the pumps exist.
    pub async fn wait_close_requested(&self) {
        self.wait_close(false).await
    }

    /// Resolves once a close has been requested; with `hard_only`, resolves
    /// only for a hard close.
    async fn wait_close(&self, hard_only: bool) {
        loop {
            let notified = self.close_signal.notified();
            let mode = self.close_mode();
            if mode == CLOSE_HARD || (!hard_only && mode != CLOSE_OPEN) {
                return;
            }
            notified.await;
        }
    }

    /// Terminal transition; wakes every `wait_disconnected` waiter.
    pub fn mark_disconnected(&self) {
        self.set_state(State::Disconnected);
        self.disconnected_signal.notify_waiters();
    }

    /// Resolves once both pumps have exited and `on_closed` has run.
    pub async fn wait_disconnected(&self) {
        loop {
            let notified = self.disconnected_signal.notified();
            if self.state() == State::Disconnected {
                return;
            }
            notified.await;
        }
    }

    /// Non-blocking enqueue. Returns `false` when the endpoint is not
    /// connected, is closing, or when accepting the bytes would exceed
    /// `send_buffer_limit` — the back-pressure signal.
    pub fn send_async(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        if !self.is_connected() || self.close_mode() != CLOSE_OPEN {
            return false;
        }
        {
            let mut main = self.queue.lock().unwrap();
            let limit = self.options.send_buffer_limit as u64;
            if limit > 0 {
                let outstanding = self.bytes_pending() + self.bytes_sending();
                if outstanding + data.len() as u64 > limit {
                    return false;
                }
            }
            main.append(data);
            self.bytes_pending
                .fetch_add(data.len() as u64, Ordering::SeqCst);
        }
        self.send_signal.notify_one();
        true
    }

    /// Awaiting enqueue: waits for drain capacity instead of refusing,
    /// bounded by `send_timeout`. Must not be called from inside a callback
    /// of the same endpoint.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let attempt = async {
            loop {
                if !self.is_connected() {
                    return Err(Error::NotConnected);
                }
                if self.send_async(data) {
                    return Ok(());
                }
                let notified = self.drain_signal.notified();
                if self.send_async(data) {
                    return Ok(());
                }
                notified.await;
            }
        };
        match self.options.send_timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt)
                .await
                .map_err(|_| Error::TimedOut)?,
            None => attempt.await,
        }
    }

    fn queue_is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

/// Split the connected stream and run both pumps to completion, then report
/// the close. This is the only place `on_closed` fires.
pub(crate) fn spawn(
    core: Arc<StreamCore>,
    stream: IoStream,
    callbacks: Arc<dyn StreamCallbacks>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let connected_at = Instant::now();
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = tokio::spawn(receive_pump(core.clone(), read_half, callbacks.clone()));
        let writer = tokio::spawn(send_pump(core.clone(), write_half, callbacks.clone()));
        let _ = reader.await;
        let _ = writer.await;
        core.set_state(State::Disconnected);
        callbacks.on_closed().await;
        let lifetime = Duration::from_millis(connected_at.elapsed().as_millis() as u64);
        debug!(
            stream = %core.id(),
            lifetime = %format_duration(lifetime),
            sent = %format_size(core.bytes_sent()),
            received = %format_size(core.bytes_received()),
            "stream closed"
        );
        core.mark_disconnected();
    })
}

enum ReadOutcome {
    Data(usize),
    Eof,
    TimedOut,
    Closed,
    Failed(std::io::Error),
}

/// Resolves after `timeout`, or never when no timeout is configured.
async fn idle_deadline(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => futures::future::pending().await,
    }
}

/// One receive operation in flight at a time, re-armed after each delivery.
/// The armed region doubles whenever a read fills it completely, bounded by
/// `receive_buffer_limit`.
async fn receive_pump(
    core: Arc<StreamCore>,
    mut read_half: ReadHalf<IoStream>,
    callbacks: Arc<dyn StreamCallbacks>,
) {
    let mut buffer = Buffer::with_capacity(core.options.receive_buffer_size);
    let mut chunk = core.options.receive_buffer_size.max(1);
    loop {
        if core.close_mode() != CLOSE_OPEN {
            break;
        }
        buffer.clear();
        let outcome = {
            let slice = buffer.write_slice(chunk);
            tokio::select! {
                result = read_half.read(slice) => match result {
                    Ok(0) => ReadOutcome::Eof,
                    Ok(received) => ReadOutcome::Data(received),
                    Err(error) => ReadOutcome::Failed(error),
                },
                _ = idle_deadline(core.options.receive_timeout) => ReadOutcome::TimedOut,
                _ = core.wait_close(false) => ReadOutcome::Closed,
            }
        };
        match outcome {
            ReadOutcome::Data(received) => {
                buffer.commit(received);
                core.bytes_received
                    .fetch_add(received as u64, Ordering::SeqCst);
                callbacks.on_received(buffer.remaining()).await;
                if received == chunk {
                    chunk *= 2;
                    let limit = core.options.receive_buffer_limit;
                    if limit > 0 && chunk > limit {
                        callbacks.on_error(Error::BufferOverflow).await;
                        core.close(true);
                        break;
                    }
                }
            }
            // Zero-length read: the peer closed its end.
            ReadOutcome::Eof => {
                core.close(true);
                break;
            }
            ReadOutcome::TimedOut => {
                core.close(true);
                callbacks.on_error(Error::TimedOut).await;
                break;
            }
            ReadOutcome::Closed => break,
            ReadOutcome::Failed(error) => {
                let error = Error::from(error);
                core.close(true);
                callbacks.on_error(error).await;
                break;
            }
        }
    }
}

async fn send_pump(
    core: Arc<StreamCore>,
    mut write_half: WriteHalf<IoStream>,
    callbacks: Arc<dyn StreamCallbacks>,
) {
    let mut flush = Buffer::with_capacity(core.options.send_buffer_size);
    loop {
        if flush.is_empty() {
            flush.clear();
            {
                let mut main = core.queue.lock().unwrap();
                if !main.is_empty() {
                    std::mem::swap(&mut *main, &mut flush);
                    let swapped = flush.remaining().len() as u64;
                    core.bytes_pending.fetch_sub(swapped, Ordering::SeqCst);
                    core.bytes_sending.fetch_add(swapped, Ordering::SeqCst);
                }
            }
            if flush.is_empty() {
                if core.close_mode() != CLOSE_OPEN {
                    // Nothing left to drain.
                    break;
                }
                let notified = core.send_signal.notified();
                if core.close_mode() != CLOSE_OPEN || !core.queue_is_empty() {
                    continue;
                }
                notified.await;
                continue;
            }
        }
        let size = flush.remaining().len();
        // A hard close aborts the in-flight write; a graceful close lets the
        // queue drain.
        let result = tokio::select! {
            result = write_half.write_all(flush.remaining()) => Some(result),
            _ = core.wait_close(true) => None,
        };
        match result {
            Some(Ok(())) => {
                flush.clear();
                core.bytes_sending.fetch_sub(size as u64, Ordering::SeqCst);
                core.bytes_sent.fetch_add(size as u64, Ordering::SeqCst);
                let pending = core.bytes_pending();
                callbacks.on_sent(size as u64, pending).await;
                core.drain_signal.notify_waiters();
                if pending == 0 && core.queue_is_empty() {
                    callbacks.on_empty().await;
                }
            }
            Some(Err(error)) => {
                core.close(true);
                callbacks.on_error(error.into()).await;
                break;
            }
            None => break,
        }
    }
    let _ = write_half.shutdown().await;
}
