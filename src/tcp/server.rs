//! The accepting side of the TCP transport.

use tracing::{debug, info};
use {
    std::collections::HashMap,
    std::net::SocketAddr,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    tokio::net::{TcpListener, TcpStream},
    tokio::sync::mpsc,
    tokio::task::JoinHandle,
};

use crate::error::{Error, Result};
use crate::handler::ServerHandler;
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::stream::engine::{self, State, StreamCore};
use crate::tcp::session::{SessionBridge, TcpSession};

/// A TCP server. Owns its sessions exclusively: they are created on accept
/// and destroyed once their disconnect has been observed.
pub struct TcpServer {
    id: EndpointId,
    address: SocketAddr,
    options: StreamOptions,
    handler: Arc<dyn ServerHandler<TcpSession>>,
    started: AtomicBool,
    acceptor: Mutex<Option<Acceptor>>,
    sessions: RwLock<HashMap<EndpointId, Arc<TcpSession>>>,
}

struct Acceptor {
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
    local_address: SocketAddr,
}

impl TcpServer {
    pub fn new(
        address: SocketAddr,
        handler: Arc<dyn ServerHandler<TcpSession>>,
        options: StreamOptions,
    ) -> Arc<TcpServer> {
        Arc::new(TcpServer {
            id: EndpointId::random(),
            address,
            options,
            handler,
            started: AtomicBool::new(false),
            acceptor: Mutex::new(None),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The address actually bound, useful when the configured port is 0.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.acceptor
            .lock()
            .unwrap()
            .as_ref()
            .map(|acceptor| acceptor.local_address)
    }

    pub fn connected_sessions(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ServerHandler<TcpSession>> {
        &self.handler
    }

    /// Bind the acceptor and begin accepting sessions. Fails with
    /// [`Error::AlreadyStarted`] when the server is running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        let listener = match bind_listener(self.address, &self.options) {
            Ok(listener) => listener,
            Err(error) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };
        let local_address = listener.local_addr()?;
        info!(%local_address, "TCP server listening");

        let (stop, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(accept_loop(self.clone(), listener, stop_rx));
        *self.acceptor.lock().unwrap() = Some(Acceptor {
            stop,
            task,
            local_address,
        });
        self.handler.on_started().await;
        Ok(())
    }

    /// Stop accepting, disconnect every session and wait for them to drain.
    pub async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }
        let acceptor = self.acceptor.lock().unwrap().take();
        if let Some(acceptor) = acceptor {
            let _ = acceptor.stop.send(()).await;
            let _ = acceptor.task.await;
        }
        self.disconnect_all().await;
        self.handler.on_stopped().await;
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Enqueue `data` to every connected session. Per-session back-pressure
    /// may reject an individual enqueue without failing the operation;
    /// returns `false` only when the server is not started.
    pub fn multicast(&self, data: &[u8]) -> bool {
        if !self.is_started() {
            return false;
        }
        for session in self.snapshot() {
            session.send_async(data);
        }
        true
    }

    /// Request disconnection of every session and wait until each is gone.
    pub async fn disconnect_all(&self) {
        let sessions = self.snapshot();
        for session in &sessions {
            session.abort();
        }
        for session in sessions {
            session.wait_disconnected().await;
        }
    }

    /// Sessions currently registered, snapshotted so no lock is held during
    /// iteration or I/O.
    pub fn snapshot(&self) -> Vec<Arc<TcpSession>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    pub fn find_session(&self, id: EndpointId) -> Option<Arc<TcpSession>> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    pub(crate) fn unregister(&self, id: EndpointId) {
        self.sessions.write().unwrap().remove(&id);
    }

    async fn accept_session(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(error) = configure_stream(&stream, &self.options) {
            self.handler.on_error(error.into()).await;
            return;
        }
        let core = StreamCore::new(self.options.clone());
        core.begin_connect();
        let session = Arc::new(TcpSession::new(core.clone(), Arc::downgrade(self), peer));
        self.sessions
            .write()
            .unwrap()
            .insert(session.id(), session.clone());
        core.set_state(State::Connected);
        debug!(session = %session.id(), %peer, "session connected");
        self.handler.on_connected(&session).await;
        let bridge = Arc::new(SessionBridge::new(session, self.clone()));
        engine::spawn(core, stream.into(), bridge);
    }
}

async fn accept_loop(
    server: Arc<TcpServer>,
    listener: TcpListener,
    mut stop: mpsc::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.recv() => break,
        };
        match accepted {
            Ok((stream, peer)) => server.accept_session(stream, peer).await,
            // Per-connection accept errors are local; the listener stays up.
            Err(error) => server.handler.on_error(error.into()).await,
        }
    }
}

/// Create, configure and bind a listening socket honoring the acceptor
/// options tokio does not expose directly.
pub(crate) fn bind_listener(address: SocketAddr, options: &StreamOptions) -> Result<TcpListener> {
    let domain = if address.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let socket = socket2::Socket::new(
        domain,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    if address.is_ipv6() {
        socket.set_only_v6(!options.dual_mode)?;
    }
    socket.set_reuse_address(options.reuse_address)?;
    #[cfg(unix)]
    socket.set_reuse_port(options.reuse_port)?;
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    socket.listen(options.acceptor_backlog as i32)?;
    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener)?)
}

/// Apply per-connection socket options to an accepted or connected stream.
pub(crate) fn configure_stream(
    stream: &TcpStream,
    options: &StreamOptions,
) -> std::io::Result<()> {
    stream.set_nodelay(options.no_delay)?;
    let socket = socket2::SockRef::from(stream);
    if let Some(keep_alive) = options.keep_alive {
        let mut parameters = socket2::TcpKeepalive::new()
            .with_time(keep_alive.time)
            .with_interval(keep_alive.interval);
        #[cfg(unix)]
        {
            parameters = parameters.with_retries(keep_alive.retries);
        }
        socket.set_tcp_keepalive(&parameters)?;
    }
    socket.set_recv_buffer_size(options.receive_buffer_size)?;
    socket.set_send_buffer_size(options.send_buffer_size)?;
    Ok(())
}
