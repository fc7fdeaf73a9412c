//! Tunable socket and buffer options applied when an endpoint is started or
//! connected. Every option has a working default; setters are chainable.

use std::time::Duration;

use crate::defaults;

/// TCP keep-alive probing parameters.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    /// Idle time before the first probe.
    pub time: Duration,
    /// Interval between unacknowledged probes.
    pub interval: Duration,
    /// Number of failed probes before the connection is dropped.
    pub retries: u32,
}

impl Default for KeepAlive {
    fn default() -> Self {
        KeepAlive {
            time: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            retries: 5,
        }
    }
}

/// Options shared by every stream endpoint (TCP, TLS, Unix sockets).
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Disable Nagle's algorithm.
    pub no_delay: bool,
    /// Enable keep-alive probing with the given parameters.
    pub keep_alive: Option<KeepAlive>,
    /// Allow rebinding a recently used local address.
    pub reuse_address: bool,
    /// Allow several acceptors to share one port (Unix only).
    pub reuse_port: bool,
    /// Accept both IPv4 and IPv6 on an IPv6 listener.
    pub dual_mode: bool,
    /// Pending-connection queue length for acceptors.
    pub acceptor_backlog: u32,
    /// Size of the region armed for each receive.
    pub receive_buffer_size: usize,
    /// Initial capacity of the outbound buffers.
    pub send_buffer_size: usize,
    /// Hard cap on receive-buffer growth; 0 means unlimited.
    pub receive_buffer_limit: usize,
    /// Hard cap on queued outbound bytes; 0 means unlimited.
    pub send_buffer_limit: usize,
    /// How long the awaiting `send` variant waits for drain capacity.
    pub send_timeout: Option<Duration>,
    /// How long a receive may sit idle before the session is dropped.
    pub receive_timeout: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            no_delay: false,
            keep_alive: None,
            reuse_address: false,
            reuse_port: false,
            dual_mode: false,
            acceptor_backlog: defaults::acceptor_backlog(),
            receive_buffer_size: defaults::receive_buffer_size(),
            send_buffer_size: defaults::send_buffer_size(),
            receive_buffer_limit: 0,
            send_buffer_limit: 0,
            send_timeout: Some(defaults::send_timeout()),
            receive_timeout: None,
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_delay(&mut self, no_delay: bool) -> &mut Self {
        self.no_delay = no_delay;
        self
    }

    pub fn keep_alive(&mut self, keep_alive: Option<KeepAlive>) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn reuse_address(&mut self, reuse_address: bool) -> &mut Self {
        self.reuse_address = reuse_address;
        self
    }

    pub fn reuse_port(&mut self, reuse_port: bool) -> &mut Self {
        self.reuse_port = reuse_port;
        self
    }

    pub fn dual_mode(&mut self, dual_mode: bool) -> &mut Self {
        self.dual_mode = dual_mode;
        self
    }

    pub fn acceptor_backlog(&mut self, backlog: u32) -> &mut Self {
        self.acceptor_backlog = backlog;
        self
    }

    pub fn receive_buffer_size(&mut self, size: usize) -> &mut Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn send_buffer_size(&mut self, size: usize) -> &mut Self {
        self.send_buffer_size = size;
        self
    }

    pub fn receive_buffer_limit(&mut self, limit: usize) -> &mut Self {
        self.receive_buffer_limit = limit;
        self
    }

    pub fn send_buffer_limit(&mut self, limit: usize) -> &mut Self {
        self.send_buffer_limit = limit;
        self
    }

    pub fn send_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.send_timeout = timeout;
        self
    }

    pub fn receive_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.receive_timeout = timeout;
        self
    }
}

/// Options for datagram endpoints.
#[derive(Debug, Clone)]
pub struct UdpOptions {
    /// Allow rebinding a recently used local address. Enabled automatically
    /// for multicast receivers.
    pub reuse_address: bool,
    /// Allow several sockets to share one port (Unix only).
    pub reuse_port: bool,
    /// Size of the region armed for each datagram receive; datagrams longer
    /// than this are truncated by the OS.
    pub receive_buffer_size: usize,
    /// Whether multicast datagrams loop back to the sending host.
    pub multicast_loopback: bool,
}

impl Default for UdpOptions {
    fn default() -> Self {
        UdpOptions {
            reuse_address: false,
            reuse_port: false,
            receive_buffer_size: defaults::receive_buffer_size(),
            multicast_loopback: true,
        }
    }
}

impl UdpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reuse_address(&mut self, reuse_address: bool) -> &mut Self {
        self.reuse_address = reuse_address;
        self
    }

    pub fn reuse_port(&mut self, reuse_port: bool) -> &mut Self {
        self.reuse_port = reuse_port;
        self
    }

    pub fn receive_buffer_size(&mut self, size: usize) -> &mut Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn multicast_loopback(&mut self, loopback: bool) -> &mut Self {
        self.multicast_loopback = loopback;
        self
    }
}
