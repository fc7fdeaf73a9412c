//! Unix Domain Socket transport endpoints (stream type). The server unlinks
//! its socket path when stopped.

pub mod client;
pub mod server;
pub mod session;

pub use client::UdsClient;
pub use server::UdsServer;
pub use session::UdsSession;
