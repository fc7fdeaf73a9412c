mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use zeekabel::tls::{SslClient, SslServer, SslSession, TlsClientContext, TlsServerContext};
use zeekabel::{ClientHandler, ServerHandler, StreamOptions};

const CERTIFICATE: &str = "tests/fixtures/localhost.crt";
const PRIVATE_KEY: &str = "tests/fixtures/localhost.key";

struct EchoServer;

#[async_trait]
impl ServerHandler<SslSession> for EchoServer {
    async fn on_received(&self, session: &Arc<SslSession>, data: &[u8]) {
        session.send_async(data);
    }
}

struct Collector {
    received: mpsc::UnboundedSender<Vec<u8>>,
    events: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl ClientHandler<SslClient> for Collector {
    async fn on_connected(&self, _client: &Arc<SslClient>) {
        self.events.lock().unwrap().push("connected");
    }

    async fn on_handshaked(&self, _client: &Arc<SslClient>) {
        self.events.lock().unwrap().push("handshaked");
    }

    async fn on_received(&self, _client: &Arc<SslClient>, data: &[u8]) {
        self.events.lock().unwrap().push("received");
        let _ = self.received.send(data.to_vec());
    }
}

#[tokio::test]
async fn tls_echo_roundtrip() {
    common::setup();
    let context = TlsServerContext::from_pem(CERTIFICATE, PRIVATE_KEY).unwrap();
    let server = SslServer::new(
        "127.0.0.1:0".parse().unwrap(),
        context,
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let mut client_context = TlsClientContext::new();
    client_context.trust_certificate(CERTIFICATE).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let collector = Arc::new(Collector {
        received: tx,
        events: Mutex::new(Vec::new()),
    });
    let client = SslClient::new(
        "localhost",
        address.port(),
        client_context,
        collector.clone(),
        StreamOptions::default(),
    );
    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert!(client.is_handshaked());

    client.send(b"secret payload").await.unwrap();
    let mut collected = Vec::new();
    while collected.len() < 14 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for echo")
            .expect("channel closed");
        collected.extend(chunk);
    }
    assert_eq!(collected, b"secret payload");

    // The handshake completes after connect and before the first plaintext
    // delivery.
    let events = collector.events.lock().unwrap().clone();
    let connected = events.iter().position(|event| *event == "connected");
    let handshaked = events.iter().position(|event| *event == "handshaked");
    let received = events.iter().position(|event| *event == "received");
    match (connected, handshaked, received) {
        (Some(connected), Some(handshaked), Some(received)) => {
            assert!(
                connected < handshaked && handshaked < received,
                "order was {:?}",
                events
            );
        }
        _ => panic!("missing lifecycle events: {:?}", events),
    }

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn untrusted_certificate_fails_the_handshake() {
    common::setup();
    let context = TlsServerContext::from_pem(CERTIFICATE, PRIVATE_KEY).unwrap();
    let server = SslServer::new(
        "127.0.0.1:0".parse().unwrap(),
        context,
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    // No explicit trust for the self-signed certificate: the handshake must
    // fail and the client must end up disconnected.
    let (tx, _rx) = mpsc::unbounded_channel();
    let collector = Arc::new(Collector {
        received: tx,
        events: Mutex::new(Vec::new()),
    });
    let client = SslClient::new(
        "localhost",
        address.port(),
        TlsClientContext::new(),
        collector,
        StreamOptions::default(),
    );
    assert!(client.connect().await.is_err());
    assert!(!client.is_handshaked());

    server.stop().await.unwrap();
}
