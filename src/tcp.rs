//! TCP transport endpoints: an accepting server, the sessions it owns, and
//! a reconnectable client.

pub mod client;
pub mod server;
pub mod session;

pub use client::TcpClient;
pub use server::TcpServer;
pub use session::TcpSession;
