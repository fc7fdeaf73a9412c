//! Asynchronous network transport endpoints over four socket modalities —
//! stream TCP, datagram UDP (including IP multicast), Unix Domain Sockets
//! and TLS-secured streams — with HTTP/1.1 and RFC 6455 WebSocket framing
//! layered directly on top.
//!
//! Every endpoint owns its socket, a swap-buffered send queue and a
//! receive buffer, and reports its lifecycle through an async handler
//! injected at construction. Servers exclusively own the sessions they
//! accept; clients can be reconnected in place.

pub mod buffer;
pub mod defaults;
pub mod error;
pub mod handler;
pub mod http;
pub mod id;
pub mod options;
pub(crate) mod stream;
pub mod tcp;
pub mod tls;
pub mod udp;
#[cfg(unix)]
pub mod uds;
pub mod utils;
pub mod ws;

pub use buffer::Buffer;
pub use error::{Error, Result};
pub use handler::{ClientHandler, NopHandler, ServerHandler};
pub use id::EndpointId;
pub use options::{KeepAlive, StreamOptions, UdpOptions};
