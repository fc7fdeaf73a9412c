//! The receiving side of the datagram transport.
//!
//! A multicast server started with [`UdpServer::start_multicast`] binds to
//! `ANY:port` with address reuse and joins the group. The socket does not
//! filter unicast datagrams arriving on the same port; they are delivered
//! through `on_received` exactly like group traffic.

use tracing::{debug, info};
use {
    std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
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
use crate::udp::UdpServerHandler;

pub struct UdpServer {
    id: EndpointId,
    address: SocketAddr,
    options: UdpOptions,
    handler: Arc<dyn UdpServerHandler>,
    started: AtomicBool,
    io: Mutex<Option<Io>>,
    groups: Mutex<Vec<IpAddr>>,
    datagrams_sent: AtomicU64,
    datagrams_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

struct Io {
    socket: Arc<UdpSocket>,
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
    local_address: SocketAddr,
}

impl UdpServer {
    pub fn new(
        address: SocketAddr,
        handler: Arc<dyn UdpServerHandler>,
        options: UdpOptions,
    ) -> Arc<UdpServer> {
        Arc::new(UdpServer {
            id: EndpointId::random(),
            address,
            options,
            handler,
            started: AtomicBool::new(false),
            io: Mutex::new(None),
            groups: Mutex::new(Vec::new()),
            datagrams_sent: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.io.lock().unwrap().as_ref().map(|io| io.local_address)
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

    /// Bind the configured address and start receiving datagrams.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.start_with(self.address, &self.options.clone()).await
    }

    /// Bind `ANY:port` with address reuse and join `group`: the multicast
    /// receiver pattern.
    pub async fn start_multicast(self: &Arc<Self>, group: IpAddr, port: u16) -> Result<()> {
        let any: IpAddr = match group {
            IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let mut options = self.options.clone();
        options.reuse_address(true);
        self.start_with(SocketAddr::new(any, port), &options).await?;
        self.join_multicast_group(group)?;
        Ok(())
    }

    async fn start_with(self: &Arc<Self>, address: SocketAddr, options: &UdpOptions) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        let socket = match bind_datagram_socket(address, options) {
            Ok(socket) => Arc::new(socket),
            Err(error) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };
        let local_address = socket.local_addr()?;
        info!(%local_address, "UDP server started");

        let (stop, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(receive_loop(self.clone(), socket.clone(), stop_rx));
        *self.io.lock().unwrap() = Some(Io {
            socket,
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
        for group in self.groups.lock().unwrap().drain(..).collect::<Vec<_>>() {
            let _ = self.leave_group(group);
        }
        let io = self.io.lock().unwrap().take();
        if let Some(io) = io {
            let _ = io.stop.send(()).await;
            let _ = io.task.await;
        }
        self.handler.on_stopped().await;
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Join an IGMP group so datagrams multicast to it are delivered here.
    pub fn join_multicast_group(&self, group: IpAddr) -> Result<()> {
        let socket = self.socket().ok_or(Error::NotStarted)?;
        match group {
            IpAddr::V4(group) => socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?,
            IpAddr::V6(group) => socket.join_multicast_v6(&group, 0)?,
        }
        self.groups.lock().unwrap().push(group);
        debug!(%group, "joined multicast group");
        Ok(())
    }

    pub fn leave_multicast_group(&self, group: IpAddr) -> Result<()> {
        self.leave_group(group)?;
        self.groups.lock().unwrap().retain(|joined| *joined != group);
        Ok(())
    }

    fn leave_group(&self, group: IpAddr) -> Result<()> {
        let socket = self.socket().ok_or(Error::NotStarted)?;
        match group {
            IpAddr::V4(group) => socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?,
            IpAddr::V6(group) => socket.leave_multicast_v6(&group, 0)?,
        }
        debug!(%group, "left multicast group");
        Ok(())
    }

    /// Send one datagram to `endpoint`, awaiting socket readiness.
    pub async fn send(&self, endpoint: SocketAddr, data: &[u8]) -> Result<usize> {
        let socket = self.socket().ok_or(Error::NotStarted)?;
        let sent = socket.send_to(data, endpoint).await?;
        self.datagrams_sent.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(sent as u64, Ordering::SeqCst);
        self.handler.on_sent(endpoint, sent).await;
        Ok(sent)
    }

    /// Non-blocking send; `false` when the socket is not ready or the server
    /// is not started.
    pub fn send_async(self: &Arc<Self>, endpoint: SocketAddr, data: &[u8]) -> bool {
        let socket = match self.socket() {
            Some(socket) => socket,
            None => return false,
        };
        match socket.try_send_to(data, endpoint) {
            Ok(sent) => {
                self.datagrams_sent.fetch_add(1, Ordering::SeqCst);
                self.bytes_sent.fetch_add(sent as u64, Ordering::SeqCst);
                let server = self.clone();
                tokio::spawn(async move {
                    server.handler.on_sent(endpoint, sent).await;
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

async fn receive_loop(
    server: Arc<UdpServer>,
    socket: Arc<UdpSocket>,
    mut stop: mpsc::Receiver<()>,
) {
    let mut buffer = vec![0u8; server.options.receive_buffer_size.max(1)];
    loop {
        let received = tokio::select! {
            received = socket.recv_from(&mut buffer) => received,
            _ = stop.recv() => break,
        };
        match received {
            Ok((size, endpoint)) => {
                server.datagrams_received.fetch_add(1, Ordering::SeqCst);
                server
                    .bytes_received
                    .fetch_add(size as u64, Ordering::SeqCst);
                server.handler.on_received(endpoint, &buffer[..size]).await;
            }
            Err(error) => {
                server.handler.on_error(error.into()).await;
            }
        }
    }
}

/// Create and bind a datagram socket honoring the reuse options.
pub(crate) fn bind_datagram_socket(
    address: SocketAddr,
    options: &UdpOptions,
) -> Result<UdpSocket> {
    let domain = if address.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
    socket.set_reuse_address(options.reuse_address)?;
    #[cfg(unix)]
    socket.set_reuse_port(options.reuse_port)?;
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    let socket: std::net::UdpSocket = socket.into();
    let socket = UdpSocket::from_std(socket)?;
    if address.is_ipv4() {
        socket.set_multicast_loop_v4(options.multicast_loopback)?;
    }
    Ok(socket)
}
