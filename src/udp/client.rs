//! The sending side of the datagram transport. With `reuse_address` set the
//! client binds `host:port` itself (the multicast receiver pattern);
//! otherwise it binds an ephemeral local port and treats `host:port` as the
//! default send destination.

use tracing::debug;
use {
    std::io,
    std::net::{IpAddr, Ipv4Addr, SocketAddr},
    std::sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    tokio::net::UdpSocket,
    tokio::sync::mpsc,
    tokio::task::JoinHandle,
};

use crate::error::{Error, Result};
use crate::id::EndpointId;
use crate::options::UdpOptions;
use crate::udp::server::bind_datagram_socket;
use crate::udp::UdpClientHandler;

pub struct UdpClient {
    id: EndpointId,
    host: String,
    port: u16,
    options: UdpOptions,
    handler: Arc<dyn UdpClientHandler>,
    connected: AtomicBool,
    io: Mutex<Option<Io>>,
    remote: Mutex<Option<SocketAddr>>,
    datagrams_sent: AtomicU64,
    datagrams_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

struct Io {
    socket: Arc<UdpSocket>,
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl UdpClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        handler: Arc<dyn UdpClientHandler>,
        options: UdpOptions,
    ) -> Arc<UdpClient> {
        Arc::new(UdpClient {
            id: EndpointId::random(),
            host: host.into(),
            port,
            options,
            handler,
            connected: AtomicBool::new(false),
            io: Mutex::new(None),
            remote: Mutex::new(None),
            datagrams_sent: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.io
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|io| io.socket.local_addr().ok())
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent.load(Ordering::SeqCst)
    }

    pub fn datagrams_received(&self) -> u64 {
        self.datagrams_received.load(Ordering::SeqCst)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::SeqCst)
    }

    /// Create the socket and start receiving.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyConnected);
        }
        let result = self.setup().await;
        match result {
            Ok(()) => {
                self.handler.on_connected().await;
                Ok(())
            }
            Err(error) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    async fn setup(self: &Arc<Self>) -> Result<()> {
        let remote = resolve(&self.host, self.port).await?;
        let local = if self.options.reuse_address {
            // Multicast receiver: share the port the traffic targets.
            remote
        } else {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        };
        let socket = Arc::new(bind_datagram_socket(local, &self.options)?);
        debug!(client = %self.id, local = %socket.local_addr()?, "UDP client ready");

        *self.remote.lock().unwrap() = Some(remote);
        let (stop, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(receive_loop(self.clone(), socket.clone(), stop_rx));
        *self.io.lock().unwrap() = Some(Io { socket, stop, task });
        Ok(())
    }

    pub fn connect_async(self: &Arc<Self>) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(error) = client.connect().await {
                client.handler.on_error(error).await;
            }
        });
    }

    pub async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let io = self.io.lock().unwrap().take();
        if let Some(io) = io {
            let _ = io.stop.send(()).await;
            let _ = io.task.await;
        }
        self.handler.on_disconnected().await;
        Ok(())
    }

    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        let _ = self.disconnect().await;
        self.connect().await
    }

    pub fn join_multicast_group(&self, group: IpAddr) -> Result<()> {
        let socket = self.socket().ok_or(Error::NotConnected)?;
        match group {
            IpAddr::V4(group) => socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?,
            IpAddr::V6(group) => socket.join_multicast_v6(&group, 0)?,
        }
        Ok(())
    }

    pub fn leave_multicast_group(&self, group: IpAddr) -> Result<()> {
        let socket = self.socket().ok_or(Error::NotConnected)?;
        match group {
            IpAddr::V4(group) => socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?,
            IpAddr::V6(group) => socket.leave_multicast_v6(&group, 0)?,
        }
        Ok(())
    }

    /// Send one datagram to the default destination.
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        let remote = self.remote.lock().unwrap().ok_or(Error::NotConnected)?;
        self.send_to(remote, data).await
    }

    /// Send one datagram to an explicit endpoint.
    pub async fn send_to(&self, endpoint: SocketAddr, data: &[u8]) -> Result<usize> {
        let socket = self.socket().ok_or(Error::NotConnected)?;
        let sent = socket.send_to(data, endpoint).await?;
        self.datagrams_sent.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(sent as u64, Ordering::SeqCst);
        self.handler.on_sent(endpoint, sent).await;
        Ok(sent)
    }

    /// Non-blocking send to the default destination; `false` when the socket
    /// is not ready.
    pub fn send_async(self: &Arc<Self>, data: &[u8]) -> bool {
        let remote = match *self.remote.lock().unwrap() {
            Some(remote) => remote,
            None => return false,
        };
        let socket = match self.socket() {
            Some(socket) => socket,
            None => return false,
        };
        match socket.try_send_to(data, remote) {
            Ok(sent) => {
                self.datagrams_sent.fetch_add(1, Ordering::SeqCst);
                self.bytes_sent.fetch_add(sent as u64, Ordering::SeqCst);
                let client = self.clone();
                tokio::spawn(async move {
                    client.handler.on_sent(remote, sent).await;
                });
                true
            }
            Err(_) => false,
        }
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.io.lock().unwrap().as_ref().map(|io| io.socket.clone())
    }
}

async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown host: {}", host))
        })
}

async fn receive_loop(
    client: Arc<UdpClient>,
    socket: Arc<UdpSocket>,
    mut stop: mpsc::Receiver<()>,
) {
    let mut buffer = vec![0u8; client.options.receive_buffer_size.max(1)];
    loop {
        let received = tokio::select! {
            received = socket.recv_from(&mut buffer) => received,
            _ = stop.recv() => break,
        };
        match received {
            Ok((size, endpoint)) => {
                client.datagrams_received.fetch_add(1, Ordering::SeqCst);
                client
                    .bytes_received
                    .fetch_add(size as u64, Ordering::SeqCst);
                client.handler.on_received(endpoint, &buffer[..size]).await;
            }
            Err(error) => {
                client.handler.on_error(error.into()).await;
            }
        }
    }
}
