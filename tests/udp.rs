mod common;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use zeekabel::udp::{UdpClient, UdpClientHandler, UdpServer, UdpServerHandler};
use zeekabel::UdpOptions;

/// Echoes every datagram back to its sender.
#[derive(Default)]
struct EchoServer {
    server: Mutex<Option<Arc<UdpServer>>>,
}

#[async_trait]
impl UdpServerHandler for EchoServer {
    async fn on_received(&self, endpoint: SocketAddr, data: &[u8]) {
        let server = self.server.lock().unwrap().clone();
        if let Some(server) = server {
            let _ = server.send(endpoint, data).await;
        }
    }
}

struct Collector {
    received: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
}

#[async_trait]
impl UdpClientHandler for Collector {
    async fn on_received(&self, endpoint: SocketAddr, data: &[u8]) {
        let _ = self.received.send((endpoint, data.to_vec()));
    }
}

#[tokio::test]
async fn udp_echo_roundtrip() {
    common::setup();
    let echo = Arc::new(EchoServer::default());
    let server = UdpServer::new(
        "127.0.0.1:0".parse().unwrap(),
        echo.clone(),
        UdpOptions::default(),
    );
    *echo.server.lock().unwrap() = Some(server.clone());
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = UdpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(Collector { received: tx }),
        UdpOptions::default(),
    );
    client.connect().await.unwrap();
    client.send(b"ping").await.unwrap();

    let (from, data) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for echo")
        .expect("channel closed");
    assert_eq!(data, b"ping");
    assert_eq!(from, address);
    assert_eq!(client.datagrams_sent(), 1);
    assert_eq!(client.datagrams_received(), 1);

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

/// One datagram in, one `on_received` out: a 3-datagram burst arrives as
/// exactly three deliveries.
#[tokio::test]
async fn datagram_boundaries_are_preserved() {
    common::setup();
    let echo = Arc::new(EchoServer::default());
    let server = UdpServer::new(
        "127.0.0.1:0".parse().unwrap(),
        echo.clone(),
        UdpOptions::default(),
    );
    *echo.server.lock().unwrap() = Some(server.clone());
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = UdpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(Collector { received: tx }),
        UdpOptions::default(),
    );
    client.connect().await.unwrap();
    for payload in [&b"one"[..], b"two", b"three"] {
        client.send(payload).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (_, data) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for echo")
            .expect("channel closed");
        seen.push(data);
    }
    seen.sort();
    assert_eq!(seen, vec![b"one".to_vec(), b"three".to_vec(), b"two".to_vec()]);

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

/// Spec scenario: a multicast server fans one payload out to every joined
/// receiver. Skipped gracefully on hosts without a multicast route.
#[tokio::test]
async fn udp_multicast_fan_out() {
    common::setup();
    let group: IpAddr = "239.255.0.1".parse().unwrap();
    let port = 36963;

    let mut receiver_options = UdpOptions::default();
    receiver_options.reuse_address(true);

    let mut receivers = Vec::new();
    let mut channels = Vec::new();
    for _ in 0..2 {
        let (tx, rx) = mpsc::unbounded_channel();
        let receiver = UdpClient::new(
            "0.0.0.0",
            port,
            Arc::new(Collector { received: tx }),
            receiver_options.clone(),
        );
        if receiver.connect().await.is_err() {
            eprintln!("skipping multicast test: cannot bind shared port");
            return;
        }
        if receiver.join_multicast_group(group).is_err() {
            eprintln!("skipping multicast test: cannot join group");
            return;
        }
        receivers.push(receiver);
        channels.push(rx);
    }

    let sender = UdpServer::new(
        "0.0.0.0:0".parse().unwrap(),
        Arc::new(EchoServer::default()),
        UdpOptions::default(),
    );
    sender.start().await.unwrap();
    let payload = [0x5A_u8; 32];
    if sender
        .send(SocketAddr::new(group, port), &payload)
        .await
        .is_err()
    {
        eprintln!("skipping multicast test: no multicast route");
        return;
    }

    for rx in channels.iter_mut() {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some((_, data))) => assert_eq!(data, payload),
            _ => {
                eprintln!("skipping multicast test: datagram not delivered");
                return;
            }
        }
    }

    for receiver in &receivers {
        let _ = receiver.leave_multicast_group(group);
        receiver.disconnect().await.unwrap();
    }
    sender.stop().await.unwrap();
}
