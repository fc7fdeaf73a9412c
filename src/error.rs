//! Error kinds shared by every endpoint, and the policy for classifying
//! operating-system errors into them.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // Transport layer
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("operation timed out")]
    TimedOut,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error(transparent)]
    Io(io::Error),

    // TLS
    #[error("TLS handshake failed: {0}")]
    HandshakeFailure(String),
    #[error("invalid certificate: {0}")]
    CertificateInvalid(String),
    #[error("certificate expired: {0}")]
    CertificateExpired(String),

    // HTTP parsing
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("request or response header exceeds the configured limit")]
    HeaderTooLarge,
    #[error("message body exceeds the configured limit")]
    BodyTooLarge,

    // WebSocket
    #[error("malformed WebSocket frame: {0}")]
    InvalidFrame(String),
    #[error("client frame arrived unmasked")]
    UnmaskedClientFrame,
    #[error("server frame arrived masked")]
    MaskedServerFrame,
    #[error("unexpected WebSocket opcode {0:#x}")]
    UnexpectedOpcode(u8),

    // Back-pressure
    #[error("buffer limit exceeded")]
    BufferOverflow,

    // State-machine misuse
    #[error("endpoint is already started")]
    AlreadyStarted,
    #[error("endpoint is not started")]
    NotStarted,
    #[error("endpoint is already connected")]
    AlreadyConnected,
    #[error("endpoint is not connected")]
    NotConnected,
}

impl Error {
    /// Whether the error is fatal for the connection it occurred on. Fatal
    /// errors are followed by an automatic transition to disconnecting.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::AlreadyStarted
                | Error::NotStarted
                | Error::AlreadyConnected
                | Error::NotConnected
                | Error::BufferOverflow
        )
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::ConnectionAborted => Error::ConnectionAborted,
            io::ErrorKind::TimedOut => Error::TimedOut,
            // EHOSTUNREACH / ENETUNREACH have no stable io::ErrorKind on this
            // toolchain; match the raw errno.
            _ => match error.raw_os_error() {
                #[cfg(unix)]
                Some(113) => Error::HostUnreachable,
                #[cfg(unix)]
                Some(101) => Error::NetworkUnreachable,
                _ => Error::Io(error),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_classification() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(Error::from(refused), Error::ConnectionRefused));

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(Error::from(reset), Error::ConnectionReset));

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(matches!(Error::from(other), Error::Io(_)));
    }

    #[test]
    fn misuse_errors_are_not_fatal() {
        assert!(!Error::AlreadyStarted.is_fatal());
        assert!(!Error::NotConnected.is_fatal());
        assert!(!Error::BufferOverflow.is_fatal());
        assert!(Error::ConnectionReset.is_fatal());
        assert!(Error::HandshakeFailure("x".into()).is_fatal());
    }
}
