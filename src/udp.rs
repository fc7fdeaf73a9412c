//! Datagram endpoints. There is no session object: every datagram maps to
//! exactly one `on_received` invocation qualified by the peer endpoint, and
//! IP multicast groups may be joined and left at runtime.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Error;

pub mod client;
pub mod server;

pub use client::UdpClient;
pub use server::UdpServer;

#[async_trait]
pub trait UdpServerHandler: Send + Sync + 'static {
    async fn on_started(&self) {}

    async fn on_stopped(&self) {}

    /// One datagram arrived from `endpoint`.
    async fn on_received(&self, _endpoint: SocketAddr, _data: &[u8]) {}

    /// One datagram was handed to the OS for `endpoint`.
    async fn on_sent(&self, _endpoint: SocketAddr, _sent: usize) {}

    async fn on_error(&self, _error: Error) {}
}

#[async_trait]
pub trait UdpClientHandler: Send + Sync + 'static {
    async fn on_connected(&self) {}

    async fn on_disconnected(&self) {}

    async fn on_received(&self, _endpoint: SocketAddr, _data: &[u8]) {}

    async fn on_sent(&self, _endpoint: SocketAddr, _sent: usize) {}

    async fn on_error(&self, _error: Error) {}
}
