mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use zeekabel::tcp::{TcpClient, TcpServer, TcpSession};
use zeekabel::{ClientHandler, NopHandler, ServerHandler, StreamOptions};

struct EchoServer;

#[async_trait]
impl ServerHandler<TcpSession> for EchoServer {
    async fn on_received(&self, session: &Arc<TcpSession>, data: &[u8]) {
        session.send_async(data);
    }
}

struct Collector {
    received: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl ClientHandler<TcpClient> for Collector {
    async fn on_received(&self, _client: &Arc<TcpClient>, data: &[u8]) {
        let _ = self.received.send(data.to_vec());
    }
}

async fn recv_exactly(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>, len: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    while collected.len() < len {
        let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for data")
            .expect("channel closed");
        collected.extend(chunk);
    }
    collected
}

#[tokio::test]
async fn tcp_echo_roundtrip() {
    common::setup();
    let server = TcpServer::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = TcpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(Collector { received: tx }),
        StreamOptions::default(),
    );
    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert!(client.send_async(b"hello"));

    let echoed = recv_exactly(&mut rx, 5).await;
    assert_eq!(echoed, b"hello");
    assert_eq!(client.bytes_sent(), 5);
    assert_eq!(client.bytes_received(), 5);

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn multicast_reaches_every_session() {
    common::setup();
    let server = TcpServer::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let mut clients = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..2 {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = TcpClient::new(
            "127.0.0.1",
            address.port(),
            Arc::new(Collector { received: tx }),
            StreamOptions::default(),
        );
        client.connect().await.unwrap();
        clients.push(client);
        receivers.push(rx);
    }
    let server_for_wait = server.clone();
    assert!(common::wait_for(move || server_for_wait.connected_sessions() == 2).await);

    assert!(server.multicast(b"fan-out"));
    for rx in receivers.iter_mut() {
        let data = recv_exactly(rx, 7).await;
        assert_eq!(data, b"fan-out");
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn send_async_signals_backpressure() {
    common::setup();
    // A peer that accepts but never reads, so the client's queue cannot
    // drain once the kernel buffers fill.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let stall = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let limit = 16 * 1024;
    let mut options = StreamOptions::default();
    options.send_buffer_limit(limit);
    let client = TcpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(NopHandler),
        options,
    );
    client.connect().await.unwrap();

    let chunk = vec![0u8; 1024];
    let mut rejected = false;
    for _ in 0..10_000 {
        if !client.send_async(&chunk) {
            rejected = true;
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(rejected, "send_async must refuse once the limit is reached");
    assert!(client.bytes_pending() + client.bytes_sending() <= limit as u64);

    client.abort();
    stall.abort();
}

struct EventLog {
    events: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl ClientHandler<TcpClient> for EventLog {
    async fn on_empty(&self, _client: &Arc<TcpClient>) {
        self.events.lock().unwrap().push("empty");
    }

    async fn on_disconnected(&self, _client: &Arc<TcpClient>) {
        self.events.lock().unwrap().push("disconnected");
    }
}

#[tokio::test]
async fn graceful_close_drains_before_disconnect() {
    common::setup();
    let server = TcpServer::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let log = Arc::new(EventLog {
        events: Mutex::new(Vec::new()),
    });
    let client = TcpClient::new(
        "127.0.0.1",
        address.port(),
        log.clone(),
        StreamOptions::default(),
    );
    client.connect().await.unwrap();
    client.send(&[7u8; 100]).await.unwrap();
    client.disconnect().await.unwrap();

    let events = log.events.lock().unwrap().clone();
    let disconnects = events.iter().filter(|event| **event == "disconnected").count();
    assert_eq!(disconnects, 1, "exactly one disconnect, got {:?}", events);
    let last_empty = events.iter().rposition(|event| *event == "empty");
    let disconnected = events.iter().position(|event| *event == "disconnected");
    assert!(
        matches!((last_empty, disconnected), (Some(empty), Some(gone)) if empty < gone),
        "queue must drain before disconnect, got {:?}",
        events
    );
    assert_eq!(client.bytes_pending(), 0);

    server.stop().await.unwrap();
}

struct SessionCounter {
    connected: AtomicUsize,
    disconnected: AtomicUsize,
}

#[async_trait]
impl ServerHandler<TcpSession> for SessionCounter {
    async fn on_connected(&self, _session: &Arc<TcpSession>) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnected(&self, _session: &Arc<TcpSession>) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn session_lifecycle_is_balanced() {
    common::setup();
    let counter = Arc::new(SessionCounter {
        connected: AtomicUsize::new(0),
        disconnected: AtomicUsize::new(0),
    });
    let server = TcpServer::new(
        "127.0.0.1:0".parse().unwrap(),
        counter.clone(),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let client = TcpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(NopHandler),
        StreamOptions::default(),
    );
    client.connect().await.unwrap();
    let server_for_wait = server.clone();
    assert!(common::wait_for(move || server_for_wait.connected_sessions() == 1).await);

    client.disconnect().await.unwrap();
    let server_for_wait = server.clone();
    assert!(common::wait_for(move || server_for_wait.connected_sessions() == 0).await);

    let counter_for_wait = counter.clone();
    assert!(
        common::wait_for(move || counter_for_wait.disconnected.load(Ordering::SeqCst) == 1).await
    );
    assert_eq!(counter.connected.load(Ordering::SeqCst), 1);

    // A server cannot be started twice, and stop is terminal until the next
    // start.
    assert!(server.start().await.is_err());
    server.stop().await.unwrap();
    assert!(server.stop().await.is_err());
}
