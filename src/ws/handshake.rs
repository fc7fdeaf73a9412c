//! The HTTP upgrade exchange that precedes frame traffic: key generation,
//! the accept-key digest, and validation of both sides of the upgrade.

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A fresh `Sec-WebSocket-Key`: base64 over 16 random bytes.
pub(crate) fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    base64::encode(nonce)
}

/// `Sec-WebSocket-Accept` for a given key: base64(SHA1(key ++ GUID)).
pub(crate) fn accept_key(key: &str) -> String {
    let mut digest = Sha1::new();
    digest.update(key.as_bytes());
    digest.update(GUID.as_bytes());
    base64::encode(digest.finalize())
}

/// What the server extracted from a valid upgrade request.
pub(crate) struct Upgrade {
    pub key: String,
    pub subprotocol: Option<String>,
}

pub(crate) fn make_upgrade_request(
    host: &str,
    port: u16,
    path: &str,
    key: &str,
    subprotocols: &[String],
) -> HttpRequest {
    let mut request = HttpRequest::new();
    request.set_begin("GET", path);
    request.set_header("Host", &format!("{}:{}", host, port));
    request.set_header("Upgrade", "websocket");
    request.set_header("Connection", "Upgrade");
    request.set_header("Sec-WebSocket-Key", key);
    request.set_header("Sec-WebSocket-Version", "13");
    if !subprotocols.is_empty() {
        request.set_header("Sec-WebSocket-Protocol", &subprotocols.join(", "));
    }
    request.finish_head();
    request
}

/// Validate a client upgrade request per RFC 6455 §4.2.1.
pub(crate) fn validate_upgrade_request(request: &HttpRequest) -> Result<Upgrade> {
    if request.method() != "GET" {
        return Err(Error::ProtocolViolation(
            "WebSocket upgrade must be a GET".into(),
        ));
    }
    let upgrade = request.header("Upgrade").unwrap_or_default();
    if !upgrade.to_ascii_lowercase().contains("websocket") {
        return Err(Error::ProtocolViolation("missing Upgrade: websocket".into()));
    }
    let connection = request.header("Connection").unwrap_or_default();
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::ProtocolViolation(
            "missing Connection: Upgrade".into(),
        ));
    }
    match request.header("Sec-WebSocket-Version") {
        Some("13") => {}
        _ => {
            return Err(Error::ProtocolViolation(
                "unsupported Sec-WebSocket-Version".into(),
            ))
        }
    }
    let key = request
        .header("Sec-WebSocket-Key")
        .map(str::to_string)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| Error::ProtocolViolation("missing Sec-WebSocket-Key".into()))?;
    // Echo the first offered subprotocol, if any.
    let subprotocol = request
        .header("Sec-WebSocket-Protocol")
        .and_then(|offered| offered.split(',').next())
        .map(|first| first.trim().to_string())
        .filter(|first| !first.is_empty());
    Ok(Upgrade { key, subprotocol })
}

pub(crate) fn make_upgrade_response(key: &str, subprotocol: Option<&str>) -> HttpResponse {
    let mut response = HttpResponse::new();
    response.set_begin(101);
    response.set_header("Upgrade", "websocket");
    response.set_header("Connection", "Upgrade");
    response.set_header("Sec-WebSocket-Accept", &accept_key(key));
    if let Some(subprotocol) = subprotocol {
        response.set_header("Sec-WebSocket-Protocol", subprotocol);
    }
    response.finish_head();
    response
}

/// Validate the server's `101` answer against the key we sent.
pub(crate) fn validate_upgrade_response(response: &HttpResponse, key: &str) -> Result<()> {
    if response.status() != 101 {
        return Err(Error::ProtocolViolation(format!(
            "expected 101 Switching Protocols, got {}",
            response.status()
        )));
    }
    let expected = accept_key(key);
    match response.header("Sec-WebSocket-Accept") {
        Some(accept) if accept == expected => Ok(()),
        _ => Err(Error::ProtocolViolation(
            "Sec-WebSocket-Accept mismatch".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc6455_sample_accept_key() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_distinct_base64() {
        let first = generate_key();
        let second = generate_key();
        assert_ne!(first, second);
        assert_eq!(base64::decode(&first).unwrap().len(), 16);
    }

    #[test]
    fn upgrade_request_roundtrip() {
        let key = generate_key();
        let built = make_upgrade_request("localhost", 8080, "/chat", &key, &[]);

        let mut parsed = HttpRequest::new();
        let (_, done) = parsed.advance(built.cache()).unwrap();
        assert!(done);

        let upgrade = validate_upgrade_request(&parsed).unwrap();
        assert_eq!(upgrade.key, key);
        assert!(upgrade.subprotocol.is_none());

        let response = make_upgrade_response(&upgrade.key, None);
        let mut parsed_response = HttpResponse::new();
        let (_, done) = parsed_response.advance(response.cache()).unwrap();
        assert!(done);
        validate_upgrade_response(&parsed_response, &key).unwrap();
    }

    #[test]
    fn first_subprotocol_is_echoed() {
        let mut request = HttpRequest::new();
        request.set_begin("GET", "/");
        request.set_header("Upgrade", "websocket");
        request.set_header("Connection", "Upgrade");
        request.set_header("Sec-WebSocket-Version", "13");
        request.set_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        request.set_header("Sec-WebSocket-Protocol", "chat, superchat");
        request.finish_head();

        let upgrade = validate_upgrade_request(&request).unwrap();
        assert_eq!(upgrade.subprotocol.as_deref(), Some("chat"));
    }

    #[test]
    fn non_upgrade_request_rejected() {
        let mut request = HttpRequest::new();
        request.set_begin("GET", "/");
        request.set_header("Host", "x");
        request.finish_head();
        assert!(validate_upgrade_request(&request).is_err());
    }
}
