#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use zeekabel::uds::{UdsClient, UdsServer, UdsSession};
use zeekabel::{ClientHandler, ServerHandler, StreamOptions};

struct EchoServer;

#[async_trait]
impl ServerHandler<UdsSession> for EchoServer {
    async fn on_received(&self, session: &Arc<UdsSession>, data: &[u8]) {
        session.send_async(data);
    }
}

struct Collector {
    received: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl ClientHandler<UdsClient> for Collector {
    async fn on_received(&self, _client: &Arc<UdsClient>, data: &[u8]) {
        let _ = self.received.send(data.to_vec());
    }
}

#[tokio::test]
async fn uds_echo_roundtrip() {
    common::setup();
    let path = std::env::temp_dir().join(format!("zeekabel-uds-{}.sock", std::process::id()));

    let server = UdsServer::new(&path, Arc::new(EchoServer), StreamOptions::default());
    server.start().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = UdsClient::new(&path, Arc::new(Collector { received: tx }), StreamOptions::default());
    client.connect().await.unwrap();
    assert!(client.send_async(b"over the socket file"));

    let mut collected = Vec::new();
    while collected.len() < 20 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for echo")
            .expect("channel closed");
        collected.extend(chunk);
    }
    assert_eq!(collected, b"over the socket file");

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
    // The server unlinks its socket path on stop.
    assert!(!path.exists());
}
