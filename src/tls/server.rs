//! The accepting side of the TLS transport. The context is shared by the
//! server and every session it accepts.

use tracing::{debug, error, info};
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
use crate::tcp::server::{bind_listener, configure_stream};
use crate::tls::context::TlsServerContext;
use crate::tls::session::{SessionBridge, SslSession};

pub struct SslServer {
    id: EndpointId,
    address: SocketAddr,
    context: TlsServerContext,
    options: StreamOptions,
    handler: Arc<dyn ServerHandler<SslSession>>,
    started: AtomicBool,
    acceptor: Mutex<Option<Acceptor>>,
    sessions: RwLock<HashMap<EndpointId, Arc<SslSession>>>,
}

struct Acceptor {
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
    local_address: SocketAddr,
}

impl SslServer {
    pub fn new(
        address: SocketAddr,
        context: TlsServerContext,
        handler: Arc<dyn ServerHandler<SslSession>>,
        options: StreamOptions,
    ) -> Arc<SslServer> {
        Arc::new(SslServer {
            id: EndpointId::random(),
            address,
            context,
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

    pub(crate) fn handler(&self) -> &Arc<dyn ServerHandler<SslSession>> {
        &self.handler
    }

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
        info!(%local_address, "TLS server listening");

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

    pub fn multicast(&self, data: &[u8]) -> bool {
        if !self.is_started() {
            return false;
        }
        for session in self.snapshot() {
            session.send_async(data);
        }
        true
    }

    pub async fn disconnect_all(&self) {
        let sessions = self.snapshot();
        for session in &sessions {
            session.abort();
        }
        for session in sessions {
            session.wait_disconnected().await;
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<SslSession>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    pub fn find_session(&self, id: EndpointId) -> Option<Arc<SslSession>> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    pub(crate) fn unregister(&self, id: EndpointId) {
        self.sessions.write().unwrap().remove(&id);
    }

    /// Run the TLS handshake for one accepted connection and hand the
    /// session to the pumps. Runs as its own task so a slow handshake never
    /// stalls the acceptor.
    async fn handshake_session(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(error) = configure_stream(&stream, &self.options) {
            self.handler.on_error(error.into()).await;
            return;
        }
        let core = StreamCore::new(self.options.clone());
        core.begin_connect();
        let session = Arc::new(SslSession::new(core.clone(), Arc::downgrade(&self), peer));
        self.sessions
            .write()
            .unwrap()
            .insert(session.id(), session.clone());
        core.set_state(State::Connected);
        self.handler.on_connected(&session).await;

        core.set_state(State::Handshaking);
        self.handler.on_handshaking(&session).await;
        // The close signal must be able to interrupt a stalled handshake;
        // the pumps that normally observe it are not running yet.
        let accepted = tokio::select! {
            accepted = self.context.acceptor().accept(stream) => Some(accepted),
            _ = core.wait_close_requested() => None,
        };
        match accepted {
            Some(Ok(tls_stream)) => {
                core.set_handshaked();
                core.set_state(State::Connected);
                debug!(session = %session.id(), %peer, "TLS handshake complete");
                self.handler.on_handshaked(&session).await;
                let bridge = Arc::new(SessionBridge::new(session, self.clone()));
                engine::spawn(core, tls_stream.into(), bridge);
            }
            Some(Err(handshake_error)) => {
                error!(%peer, error = %handshake_error, "TLS handshake failed");
                self.handler
                    .on_error(crate::tls::classify_handshake_error(&handshake_error))
                    .await;
                self.drop_session(&core, &session).await;
            }
            None => {
                self.drop_session(&core, &session).await;
            }
        }
    }

    /// Tear down a session whose handshake failed or was aborted, walking
    /// the same `Disconnecting` → `Disconnected` sequence as a normal close.
    async fn drop_session(&self, core: &Arc<StreamCore>, session: &Arc<SslSession>) {
        core.set_state(State::Disconnecting);
        self.handler.on_disconnecting(session).await;
        self.unregister(session.id());
        core.mark_disconnected();
        self.handler.on_disconnected(session).await;
    }
}

async fn accept_loop(
    server: Arc<SslServer>,
    listener: TcpListener,
    mut stop: mpsc::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.recv() => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                tokio::spawn(server.clone().handshake_session(stream, peer));
            }
            Err(error) => server.handler.on_error(error.into()).await,
        }
    }
}
