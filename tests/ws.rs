mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use zeekabel::ws::{OpCode, WsClient, WsClientHandler, WsServer, WsServerHandler, WsSession};
use zeekabel::StreamOptions;

struct EchoServer;

#[async_trait]
impl WsServerHandler for EchoServer {
    async fn on_ws_received(&self, session: &Arc<WsSession>, opcode: OpCode, payload: &[u8]) {
        match opcode {
            OpCode::Text => {
                session.send_text_async(std::str::from_utf8(payload).unwrap_or_default());
            }
            _ => {
                session.send_binary_async(payload);
            }
        }
    }
}

enum ClientEvent {
    Message(OpCode, Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<u16>),
}

struct Collector {
    events: mpsc::UnboundedSender<ClientEvent>,
}

#[async_trait]
impl WsClientHandler for Collector {
    async fn on_ws_received(&self, _client: &Arc<WsClient>, opcode: OpCode, payload: &[u8]) {
        let _ = self
            .events
            .send(ClientEvent::Message(opcode, payload.to_vec()));
    }

    async fn on_ws_pong(&self, _client: &Arc<WsClient>, payload: &[u8]) {
        let _ = self.events.send(ClientEvent::Pong(payload.to_vec()));
    }

    async fn on_ws_close(&self, _client: &Arc<WsClient>, code: Option<u16>, _reason: &[u8]) {
        let _ = self.events.send(ClientEvent::Close(code));
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for WebSocket event")
        .expect("channel closed")
}

#[tokio::test]
async fn ws_text_echo() {
    common::setup();
    let server = WsServer::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = WsClient::new(
        "127.0.0.1",
        address.port(),
        "/chat",
        Arc::new(Collector { events: tx }),
        StreamOptions::default(),
    );
    client.connect().await.unwrap();
    assert!(client.is_handshaked());

    client.send_text("hello").await.unwrap();
    match next_event(&mut rx).await {
        ClientEvent::Message(OpCode::Text, payload) => assert_eq!(payload, b"hello"),
        _ => panic!("expected the echoed text message"),
    }

    client.send_close(1000, "done").await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn ws_ping_gets_ponged() {
    common::setup();
    let server = WsServer::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = WsClient::new(
        "127.0.0.1",
        address.port(),
        "/",
        Arc::new(Collector { events: tx }),
        StreamOptions::default(),
    );
    client.connect().await.unwrap();

    client.send_ping(b"probe").await.unwrap();
    match next_event(&mut rx).await {
        ClientEvent::Pong(payload) => assert_eq!(payload, b"probe"),
        _ => panic!("expected a pong"),
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn ws_binary_multicast() {
    common::setup();
    let server = WsServer::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let mut channels = Vec::new();
    let mut clients = Vec::new();
    for _ in 0..2 {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = WsClient::new(
            "127.0.0.1",
            address.port(),
            "/",
            Arc::new(Collector { events: tx }),
            StreamOptions::default(),
        );
        client.connect().await.unwrap();
        clients.push(client);
        channels.push(rx);
    }

    assert!(server.multicast_binary(&[1, 2, 3]));
    for rx in channels.iter_mut() {
        match next_event(rx).await {
            ClientEvent::Message(OpCode::Binary, payload) => assert_eq!(payload, vec![1, 2, 3]),
            _ => panic!("expected the multicast binary message"),
        }
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn server_close_is_echoed_to_the_peer() {
    common::setup();
    let server = WsServer::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(EchoServer),
        StreamOptions::default(),
    );
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = WsClient::new(
        "127.0.0.1",
        address.port(),
        "/",
        Arc::new(Collector { events: tx }),
        StreamOptions::default(),
    );
    client.connect().await.unwrap();

    let server_for_wait = server.clone();
    assert!(common::wait_for(move || server_for_wait.connected_sessions() == 1).await);
    let sessions = server.snapshot();
    assert_eq!(sessions.len(), 1);
    for session in sessions {
        session.send_close(1000, "going away").await.unwrap();
    }

    match next_event(&mut rx).await {
        ClientEvent::Close(code) => assert_eq!(code, Some(1000)),
        _ => panic!("expected the close frame"),
    }

    server.stop().await.unwrap();
}
