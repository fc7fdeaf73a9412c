//! TLS-secured stream endpoints: TCP transport wrapped with a post-connect
//! handshake stage driven by rustls.

pub mod client;
pub mod context;
pub mod pem;
pub mod server;
pub mod session;

pub use client::SslClient;
pub use context::{TlsClientContext, TlsServerContext};
pub use server::SslServer;
pub use session::SslSession;

use crate::error::Error;

/// Classify a handshake failure reported through the I/O layer. rustls
/// surfaces certificate problems as formatted strings, so match on the
/// webpki error names.
pub(crate) fn classify_handshake_error(error: &std::io::Error) -> Error {
    let text = error.to_string();
    if text.contains("CertExpired") || text.contains("Expired") {
        Error::CertificateExpired(text)
    } else if text.contains("certificate") || text.contains("WebPKI") || text.contains("CertNot")
    {
        Error::CertificateInvalid(text)
    } else {
        Error::HandshakeFailure(text)
    }
}
