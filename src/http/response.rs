//! An HTTP response: parsed incrementally on the client side, or assembled
//! through the builders when serving.

use crate::error::{Error, Result};
use crate::http::parser::{body_framing, find_head_end, BodyFraming, ChunkDecoder, ParseLimits};
use crate::http::request::ParseState;

pub struct HttpResponse {
    status: u16,
    status_phrase: String,
    protocol: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    /// Raw wire bytes of the whole message.
    cache: Vec<u8>,
    limits: ParseLimits,
    state: ParseState,
    scanned: usize,
}

impl Default for HttpResponse {
    fn default() -> Self {
        HttpResponse::new()
    }
}

impl HttpResponse {
    pub fn new() -> HttpResponse {
        HttpResponse {
            status: 0,
            status_phrase: String::new(),
            protocol: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            cache: Vec::new(),
            limits: ParseLimits::default(),
            state: ParseState::Head,
            scanned: 0,
        }
    }

    pub(crate) fn with_limits(limits: ParseLimits) -> HttpResponse {
        HttpResponse {
            limits,
            ..HttpResponse::new()
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_phrase(&self) -> &str {
        &self.status_phrase
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup returning the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The raw bytes of the whole message as received or built.
    pub fn cache(&self) -> &[u8] {
        &self.cache
    }

    pub fn is_pending_header(&self) -> bool {
        matches!(self.state, ParseState::Head)
    }

    pub fn is_pending_body(&self) -> bool {
        matches!(
            self.state,
            ParseState::FixedBody { .. } | ParseState::ChunkedBody(_)
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, ParseState::Complete)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, ParseState::Failed)
    }

    pub fn clear(&mut self) -> &mut Self {
        self.status = 0;
        self.status_phrase.clear();
        self.protocol.clear();
        self.headers.clear();
        self.body.clear();
        self.cache.clear();
        self.state = ParseState::Head;
        self.scanned = 0;
        self
    }

    // --- builders ------------------------------------------------------

    /// Begin a response: writes the status line with the canonical reason
    /// phrase. Clears any previous content.
    pub fn set_begin(&mut self, status: u16) -> &mut Self {
        let phrase = status_phrase(status);
        self.clear();
        self.status = status;
        self.status_phrase = phrase.to_string();
        self.protocol = "HTTP/1.1".to_string();
        self.cache
            .extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, phrase).as_bytes());
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.cache
            .extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Finish the message with a `Content-Length` header, the blank line and
    /// the body.
    pub fn set_body(&mut self, body: &[u8]) -> &mut Self {
        self.set_header("Content-Length", &body.len().to_string());
        self.cache.extend_from_slice(b"\r\n");
        self.cache.extend_from_slice(body);
        self.body = body.to_vec();
        self.state = ParseState::Complete;
        self
    }

    /// Finish the message head with no body at all (e.g. `101 Switching
    /// Protocols`).
    pub fn finish_head(&mut self) -> &mut Self {
        self.cache.extend_from_slice(b"\r\n");
        self.state = ParseState::Complete;
        self
    }

    pub fn make_ok_response(body: &[u8], content_type: Option<&str>) -> HttpResponse {
        let mut response = HttpResponse::new();
        response.set_begin(200);
        if let Some(content_type) = content_type {
            response.set_header("Content-Type", content_type);
        }
        response.set_body(body);
        response
    }

    pub fn make_error_response(status: u16, content: &str) -> HttpResponse {
        let mut response = HttpResponse::new();
        response.set_begin(status);
        response.set_header("Content-Type", "text/plain; charset=UTF-8");
        response.set_body(content.as_bytes());
        response
    }

    // --- incremental parsing -------------------------------------------

    /// Consume bytes of an inbound response; mirrors
    /// `HttpRequest::advance`.
    pub(crate) fn advance(&mut self, data: &[u8]) -> Result<(usize, bool)> {
        let mut consumed = 0;
        loop {
            match &mut self.state {
                ParseState::Head => {
                    self.cache.extend_from_slice(&data[consumed..]);
                    match find_head_end(&self.cache, self.scanned) {
                        Some(head_end) => {
                            let leftover = self.cache.len() - head_end;
                            consumed += data.len() - consumed - leftover;
                            self.cache.truncate(head_end);
                            self.scanned = head_end;
                            if let Err(error) = self.parse_head() {
                                self.state = ParseState::Failed;
                                return Err(error);
                            }
                            let framing = if self.bodyless() {
                                BodyFraming::None
                            } else {
                                match body_framing(&self.headers) {
                                    Ok(framing) => framing,
                                    Err(error) => {
                                        self.state = ParseState::Failed;
                                        return Err(error);
                                    }
                                }
                            };
                            match framing {
                                BodyFraming::None => {
                                    self.state = ParseState::Complete;
                                    return Ok((consumed, true));
                                }
                                BodyFraming::Length(length) => {
                                    let max = self.limits.max_body_size;
                                    if max > 0 && length > max {
                                        self.state = ParseState::Failed;
                                        return Err(Error::BodyTooLarge);
                                    }
                                    self.body.reserve(length);
                                    self.state = ParseState::FixedBody { remaining: length };
                                }
                                BodyFraming::Chunked => {
                                    self.state = ParseState::ChunkedBody(ChunkDecoder::new());
                                }
                            }
                        }
                        None => {
                            consumed = data.len();
                            self.scanned = self.cache.len();
                            if self.cache.len() > self.limits.max_header_size {
                                self.state = ParseState::Failed;
                                return Err(Error::HeaderTooLarge);
                            }
                            return Ok((consumed, false));
                        }
                    }
                }
                ParseState::FixedBody { remaining } => {
                    let available = data.len() - consumed;
                    let taken = available.min(*remaining);
                    let slice = &data[consumed..consumed + taken];
                    self.cache.extend_from_slice(slice);
                    self.body.extend_from_slice(slice);
                    consumed += taken;
                    *remaining -= taken;
                    if *remaining == 0 {
                        self.state = ParseState::Complete;
                        return Ok((consumed, true));
                    }
                    return Ok((consumed, false));
                }
                ParseState::ChunkedBody(decoder) => {
                    let available = &data[consumed..];
                    let taken = match decoder.feed(available, &mut self.body) {
                        Ok(taken) => taken,
                        Err(error) => {
                            self.state = ParseState::Failed;
                            return Err(error);
                        }
                    };
                    self.cache.extend_from_slice(&available[..taken]);
                    consumed += taken;
                    let max = self.limits.max_body_size;
                    if max > 0 && self.body.len() > max {
                        self.state = ParseState::Failed;
                        return Err(Error::BodyTooLarge);
                    }
                    if decoder.is_done() {
                        self.state = ParseState::Complete;
                        return Ok((consumed, true));
                    }
                    return Ok((consumed, false));
                }
                ParseState::Complete | ParseState::Failed => return Ok((consumed, true)),
            }
        }
    }

    /// Statuses defined to carry no body regardless of framing headers.
    fn bodyless(&self) -> bool {
        self.status / 100 == 1 || self.status == 204 || self.status == 304
    }

    fn parse_head(&mut self) -> Result<()> {
        let mut headers = vec![httparse::EMPTY_HEADER; self.limits.max_header_count];
        let mut parsed = httparse::Response::new(&mut headers);
        match parsed.parse(&self.cache) {
            Ok(httparse::Status::Complete(_)) => {
                self.status = parsed.code.unwrap_or_default();
                self.status_phrase = parsed.reason.unwrap_or_default().to_string();
                self.protocol = format!("HTTP/1.{}", parsed.version.unwrap_or(1));
                self.headers = parsed
                    .headers
                    .iter()
                    .map(|header| {
                        (
                            header.name.to_string(),
                            String::from_utf8_lossy(header.value).into_owned(),
                        )
                    })
                    .collect();
                Ok(())
            }
            Ok(httparse::Status::Partial) => {
                Err(Error::ProtocolViolation("truncated response head".into()))
            }
            Err(httparse::Error::TooManyHeaders) => Err(Error::HeaderTooLarge),
            Err(error) => Err(Error::ProtocolViolation(error.to_string())),
        }
    }
}

/// Canonical reason phrases for the statuses this crate emits itself.
fn status_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_response() {
        let mut response = HttpResponse::new();
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
        let (consumed, done) = response.advance(wire).unwrap();

        assert!(done);
        assert_eq!(consumed, wire.len());
        assert_eq!(response.status(), 200);
        assert_eq!(response.status_phrase(), "OK");
        assert_eq!(response.body(), b"hi");
    }

    #[test]
    fn build_then_parse_roundtrip() {
        let built = HttpResponse::make_ok_response(b"hi", Some("text/plain"));
        let mut parsed = HttpResponse::new();
        let (consumed, done) = parsed.advance(built.cache()).unwrap();

        assert!(done);
        assert_eq!(consumed, built.cache().len());
        assert_eq!(parsed.status(), 200);
        assert_eq!(parsed.header("content-type"), Some("text/plain"));
        assert_eq!(parsed.body(), b"hi");
    }

    #[test]
    fn switching_protocols_has_no_body() {
        let mut response = HttpResponse::new();
        let wire = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n";
        let (consumed, done) = response.advance(wire).unwrap();

        assert!(done);
        assert_eq!(consumed, wire.len());
        assert_eq!(response.status(), 101);
        assert!(response.body().is_empty());
    }

    #[test]
    fn chunked_response_body() {
        let mut response = HttpResponse::new();
        let wire =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n";
        let (_, done) = response.advance(wire).unwrap();

        assert!(done);
        assert_eq!(response.body(), b"abcdef");
    }
}
