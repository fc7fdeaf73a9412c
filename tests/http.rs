mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;

use zeekabel::http::{
    HttpClient, HttpRequest, HttpResponse, HttpServer, HttpServerHandler, HttpSession,
};
use zeekabel::StreamOptions;

struct Hello {
    served_by_handler: AtomicUsize,
}

#[async_trait]
impl HttpServerHandler for Hello {
    async fn on_received_request(&self, session: &Arc<HttpSession>, request: HttpRequest) {
        self.served_by_handler.fetch_add(1, Ordering::SeqCst);
        let response = match (request.method(), request.url()) {
            ("GET", "/hello") => HttpResponse::make_ok_response(b"hi", None),
            ("POST", "/echo") => HttpResponse::make_ok_response(request.body(), None),
            _ => HttpResponse::make_error_response(404, "not found"),
        };
        session.send_response_async(&response);
    }
}

struct NopClient;

#[async_trait]
impl zeekabel::http::HttpClientHandler for NopClient {}

fn make_server() -> (Arc<HttpServer>, Arc<Hello>) {
    let handler = Arc::new(Hello {
        served_by_handler: AtomicUsize::new(0),
    });
    let server = HttpServer::new(
        "127.0.0.1:0".parse().unwrap(),
        handler.clone(),
        StreamOptions::default(),
    );
    (server, handler)
}

#[tokio::test]
async fn http_get_roundtrip() {
    common::setup();
    let (server, _) = make_server();
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let client = HttpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(NopClient),
        StreamOptions::default(),
    );
    let mut request = HttpRequest::make_get_request("/hello");
    let response = client.send_request(&request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"hi");

    // Pipelined second request on the same connection.
    request = HttpRequest::make_get_request("/missing");
    let response = client.send_request(&request).await.unwrap();
    assert_eq!(response.status(), 404);

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn http_post_body_roundtrip() {
    common::setup();
    let (server, _) = make_server();
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let client = HttpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(NopClient),
        StreamOptions::default(),
    );
    let request = HttpRequest::make_post_request("/echo", b"payload bytes", None);
    let response = client.send_request(&request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"payload bytes");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn cached_get_bypasses_the_handler() {
    common::setup();
    let (server, handler) = make_server();
    server
        .cache()
        .insert("/cached", &HttpResponse::make_ok_response(b"from cache", None), None);
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let client = HttpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(NopClient),
        StreamOptions::default(),
    );
    let request = HttpRequest::make_get_request("/cached");
    let response = client.send_request(&request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"from cache");
    assert_eq!(handler.served_by_handler.load(Ordering::SeqCst), 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn static_content_is_served() {
    common::setup();
    let directory = std::env::temp_dir().join(format!("zeekabel-static-{}", std::process::id()));
    std::fs::create_dir_all(&directory).unwrap();
    std::fs::write(directory.join("greeting.txt"), b"hello from disk").unwrap();

    let (server, _) = make_server();
    server
        .add_static_content(&directory, "/static", None)
        .unwrap();
    server.start().await.unwrap();
    let address = server.local_address().unwrap();

    let client = HttpClient::new(
        "127.0.0.1",
        address.port(),
        Arc::new(NopClient),
        StreamOptions::default(),
    );
    let request = HttpRequest::make_get_request("/static/greeting.txt");
    let response = client.send_request(&request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"hello from disk");
    assert_eq!(
        response.header("Content-Type"),
        Some("text/plain; charset=UTF-8")
    );

    server.stop().await.unwrap();
    std::fs::remove_dir_all(&directory).unwrap();
}
