//! RFC 6455 WebSocket framing layered on the HTTP upgrade: a frame codec,
//! server sessions and a client, all version 13.

pub mod client;
pub mod frame;
pub(crate) mod handshake;
pub mod server;
pub mod session;

pub use client::{WsClient, WsClientHandler};
pub use frame::OpCode;
pub use server::{WsServer, WsServerHandler};
pub use session::WsSession;
