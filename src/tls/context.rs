//! Shared TLS configuration. Contexts are immutable once an endpoint starts
//! using them and are freely shared between a server and all its sessions.

use {
    std::path::Path,
    std::sync::Arc,
    tokio_rustls::{rustls, TlsAcceptor, TlsConnector},
};

use crate::error::{Error, Result};
use crate::tls::pem;

/// Server-side TLS configuration: a certificate chain and its private key.
#[derive(Clone)]
pub struct TlsServerContext {
    acceptor: TlsAcceptor,
}

impl TlsServerContext {
    /// Build a context from PEM files: a certificate chain and a PKCS#8 or
    /// PKCS#1 private key.
    pub fn from_pem(
        certificate_chain: impl AsRef<Path>,
        private_key: impl AsRef<Path>,
    ) -> Result<TlsServerContext> {
        let mut config = rustls::ServerConfig::new(rustls::NoClientAuth::new());
        let chain = pem::read_certificates(certificate_chain)?;
        let key = pem::read_private_key(private_key)?;
        config
            .set_single_cert(chain, key)
            .map_err(|error| Error::CertificateInvalid(error.to_string()))?;
        Ok(TlsServerContext {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    pub(crate) fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }
}

/// Client-side TLS configuration. Starts from the bundled WebPKI roots;
/// additional trust and a client certificate may be layered on before the
/// context is handed to a client.
pub struct TlsClientContext {
    config: rustls::ClientConfig,
}

impl TlsClientContext {
    pub fn new() -> TlsClientContext {
        let mut config = rustls::ClientConfig::new();
        config
            .root_store
            .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
        TlsClientContext { config }
    }

    /// Add an explicitly trusted PEM certificate to the root store, e.g. a
    /// self-signed server certificate in a test deployment.
    pub fn trust_certificate(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let certificate = pem::read_single_certificate(path)?;
        self.config
            .root_store
            .add(&certificate)
            .map_err(|error| Error::CertificateInvalid(error.to_string()))?;
        Ok(self)
    }

    /// Present a client certificate during the handshake.
    pub fn client_certificate(
        &mut self,
        certificate_chain: impl AsRef<Path>,
        private_key: impl AsRef<Path>,
    ) -> Result<&mut Self> {
        let chain = pem::read_certificates(certificate_chain)?;
        let key = pem::read_private_key(private_key)?;
        self.config
            .set_single_client_cert(chain, key)
            .map_err(|error| Error::CertificateInvalid(error.to_string()))?;
        Ok(self)
    }

    /// Replace certificate verification with a user predicate over the
    /// presented chain and the policy error the built-in verifier produced
    /// (`None` when the chain verified cleanly). Returning `true` accepts
    /// the connection.
    #[cfg(feature = "dangerous_configuration")]
    pub fn verify_with(
        &mut self,
        predicate: impl Fn(&[rustls::Certificate], Option<&rustls::TLSError>) -> bool
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.config
            .dangerous()
            .set_certificate_verifier(Arc::new(PredicateVerifier {
                predicate: Box::new(predicate),
            }));
        self
    }

    pub(crate) fn connector(&self) -> TlsConnector {
        TlsConnector::from(Arc::new(self.config.clone()))
    }
}

impl Default for TlsClientContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "dangerous_configuration")]
struct PredicateVerifier {
    predicate: Box<
        dyn Fn(&[rustls::Certificate], Option<&rustls::TLSError>) -> bool + Send + Sync,
    >,
}

#[cfg(feature = "dangerous_configuration")]
impl rustls::ServerCertVerifier for PredicateVerifier {
    fn verify_server_cert(
        &self,
        roots: &rustls::RootCertStore,
        presented_certs: &[rustls::Certificate],
        dns_name: webpki::DNSNameRef<'_>,
        ocsp_response: &[u8],
    ) -> std::result::Result<rustls::ServerCertVerified, rustls::TLSError> {
        let policy_error = rustls::WebPKIVerifier::new()
            .verify_server_cert(roots, presented_certs, dns_name, ocsp_response)
            .err();
        if (self.predicate)(presented_certs, policy_error.as_ref()) {
            Ok(rustls::ServerCertVerified::assertion())
        } else {
            Err(policy_error.unwrap_or_else(|| {
                rustls::TLSError::General("certificate rejected by verification predicate".into())
            }))
        }
    }
}
