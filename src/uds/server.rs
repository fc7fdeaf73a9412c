//! The accepting side of the Unix-socket transport.

use tracing::{debug, info, warn};
use {
    std::collections::HashMap,
    std::path::{Path, PathBuf},
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    tokio::net::{UnixListener, UnixStream},
    tokio::sync::mpsc,
    tokio::task::JoinHandle,
};

use crate::error::{Error, Result};
use crate::handler::ServerHandler;
use crate::id::EndpointId;
use crate::options::StreamOptions;
use crate::stream::engine::{self, State, StreamCore};
use crate::uds::session::{SessionBridge, UdsSession};

pub struct UdsServer {
    id: EndpointId,
    path: PathBuf,
    options: StreamOptions,
    handler: Arc<dyn ServerHandler<UdsSession>>,
    started: AtomicBool,
    acceptor: Mutex<Option<Acceptor>>,
    sessions: RwLock<HashMap<EndpointId, Arc<UdsSession>>>,
}

struct Acceptor {
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl UdsServer {
    pub fn new(
        path: impl Into<PathBuf>,
        handler: Arc<dyn ServerHandler<UdsSession>>,
        options: StreamOptions,
    ) -> Arc<UdsServer> {
        Arc::new(UdsServer {
            id: EndpointId::random(),
            path: path.into(),
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

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn connected_sessions(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ServerHandler<UdsSession>> {
        &self.handler
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        let listener = match bind_listener(&self.path, &self.options) {
            Ok(listener) => listener,
            Err(error) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };
        info!(path = %self.path.display(), "Unix-socket server listening");

        let (stop, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(accept_loop(self.clone(), listener, stop_rx));
        *self.acceptor.lock().unwrap() = Some(Acceptor { stop, task });
        self.handler.on_started().await;
        Ok(())
    }

    /// Stop accepting, disconnect every session and unlink the socket path.
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
        if let Err(error) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %error, "could not unlink socket path");
        }
        self.handler.on_stopped().await;
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Enqueue `data` to every connected session; individual back-pressure
    /// rejections do not fail the operation.
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

    pub fn snapshot(&self) -> Vec<Arc<UdsSession>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    pub fn find_session(&self, id: EndpointId) -> Option<Arc<UdsSession>> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    pub(crate) fn unregister(&self, id: EndpointId) {
        self.sessions.write().unwrap().remove(&id);
    }

    async fn accept_session(self: &Arc<Self>, stream: UnixStream) {
        let core = StreamCore::new(self.options.clone());
        core.begin_connect();
        let session = Arc::new(UdsSession::new(core.clone(), Arc::downgrade(self)));
        self.sessions
            .write()
            .unwrap()
            .insert(session.id(), session.clone());
        core.set_state(State::Connected);
        debug!(session = %session.id(), "session connected");
        self.handler.on_connected(&session).await;
        let bridge = Arc::new(SessionBridge::new(session, self.clone()));
        engine::spawn(core, stream.into(), bridge);
    }
}

async fn accept_loop(
    server: Arc<UdsServer>,
    listener: UnixListener,
    mut stop: mpsc::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.recv() => break,
        };
        match accepted {
            Ok((stream, _)) => server.accept_session(stream).await,
            Err(error) => server.handler.on_error(error.into()).await,
        }
    }
}

/// Bind a listening Unix socket, clearing a stale path left over from an
/// earlier run.
fn bind_listener(path: &Path, options: &StreamOptions) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path).map_err(Error::from)?;
    }
    let socket = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::unix(path)?)?;
    socket.listen(options.acceptor_backlog as i32)?;
    let listener: std::os::unix::net::UnixListener = socket.into();
    Ok(UnixListener::from_std(listener)?)
}
