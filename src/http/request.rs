//! An HTTP request: built incrementally while parsing inbound bytes on the
//! server side, or assembled through the `set_*`/`make_*` builders on the
//! client side. The complete wire image is always available through
//! [`cache`](HttpRequest::cache).

use crate::error::{Error, Result};
use crate::http::parser::{body_framing, find_head_end, BodyFraming, ChunkDecoder, ParseLimits};

pub(crate) enum ParseState {
    Head,
    FixedBody { remaining: usize },
    ChunkedBody(ChunkDecoder),
    Complete,
    Failed,
}

pub struct HttpRequest {
    method: String,
    url: String,
    protocol: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    /// Raw wire bytes of the whole message.
    cache: Vec<u8>,
    limits: ParseLimits,
    state: ParseState,
    scanned: usize,
}

impl Default for HttpRequest {
    fn default() -> Self {
        HttpRequest::new()
    }
}

impl HttpRequest {
    pub fn new() -> HttpRequest {
        HttpRequest {
            method: String::new(),
            url: String::new(),
            protocol: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            cache: Vec::new(),
            limits: ParseLimits::default(),
            state: ParseState::Head,
            scanned: 0,
        }
    }

    pub(crate) fn with_limits(limits: ParseLimits) -> HttpRequest {
        HttpRequest {
            limits,
            ..HttpRequest::new()
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
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

    /// Reset to an empty request ready for building or parsing the next
    /// message.
    pub fn clear(&mut self) -> &mut Self {
        self.method.clear();
        self.url.clear();
        self.protocol.clear();
        self.headers.clear();
        self.body.clear();
        self.cache.clear();
        self.state = ParseState::Head;
        self.scanned = 0;
        self
    }

    // --- builders ------------------------------------------------------

    /// Begin a request: writes the request line. Clears any previous
    /// content.
    pub fn set_begin(&mut self, method: &str, url: &str) -> &mut Self {
        self.clear();
        self.method = method.to_string();
        self.url = url.to_string();
        self.protocol = "HTTP/1.1".to_string();
        self.cache
            .extend_from_slice(format!("{} {} HTTP/1.1\r\n", method, url).as_bytes());
        self
    }

    /// Append one header line.
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

    /// Finish the message head announcing `length` body bytes to follow
    /// outside of this object.
    pub fn set_body_length(&mut self, length: usize) -> &mut Self {
        self.set_header("Content-Length", &length.to_string());
        self.cache.extend_from_slice(b"\r\n");
        self.state = ParseState::Complete;
        self
    }

    /// Finish the message head with no body and no `Content-Length` (e.g. a
    /// WebSocket upgrade request).
    pub fn finish_head(&mut self) -> &mut Self {
        self.cache.extend_from_slice(b"\r\n");
        self.state = ParseState::Complete;
        self
    }

    pub fn make_head_request(url: &str) -> HttpRequest {
        Self::make_request("HEAD", url, b"", None)
    }

    pub fn make_get_request(url: &str) -> HttpRequest {
        Self::make_request("GET", url, b"", None)
    }

    pub fn make_post_request(url: &str, body: &[u8], content_type: Option<&str>) -> HttpRequest {
        Self::make_request(
            "POST",
            url,
            body,
            Some(content_type.unwrap_or("text/plain; charset=UTF-8")),
        )
    }

    pub fn make_put_request(url: &str, body: &[u8], content_type: Option<&str>) -> HttpRequest {
        Self::make_request(
            "PUT",
            url,
            body,
            Some(content_type.unwrap_or("text/plain; charset=UTF-8")),
        )
    }

    pub fn make_delete_request(url: &str) -> HttpRequest {
        Self::make_request("DELETE", url, b"", None)
    }

    pub fn make_options_request(url: &str) -> HttpRequest {
        Self::make_request("OPTIONS", url, b"", None)
    }

    pub fn make_trace_request(url: &str) -> HttpRequest {
        Self::make_request("TRACE", url, b"", None)
    }

    fn make_request(
        method: &str,
        url: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> HttpRequest {
        let mut request = HttpRequest::new();
        request.set_begin(method, url);
        if let Some(content_type) = content_type {
            request.set_header("Content-Type", content_type);
        }
        request.set_body(body);
        request
    }

    // --- incremental parsing -------------------------------------------

    /// Consume bytes of an inbound request. Returns how many bytes of
    /// `data` were taken and whether the message is now complete; unused
    /// bytes belong to the next pipelined message.
    pub(crate) fn advance(&mut self, data: &[u8]) -> Result<(usize, bool)> {
        let mut consumed = 0;
        loop {
            match &mut self.state {
                ParseState::Head => {
                    self.cache.extend_from_slice(&data[consumed..]);
                    match find_head_end(&self.cache, self.scanned) {
                        Some(head_end) => {
                            // Bytes past the head go back to the caller and
                            // re-enter as body input.
                            let leftover = self.cache.len() - head_end;
                            consumed += data.len() - consumed - leftover;
                            self.cache.truncate(head_end);
                            self.scanned = head_end;
                            if let Err(error) = self.parse_head() {
                                self.state = ParseState::Failed;
                                return Err(error);
                            }
                            let framing = match body_framing(&self.headers) {
                                Ok(framing) => framing,
                                Err(error) => {
                                    self.state = ParseState::Failed;
                                    return Err(error);
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

    fn parse_head(&mut self) -> Result<()> {
        let mut headers = vec![httparse::EMPTY_HEADER; self.limits.max_header_count];
        let mut parsed = httparse::Request::new(&mut headers);
        match parsed.parse(&self.cache) {
            Ok(httparse::Status::Complete(_)) => {
                self.method = parsed.method.unwrap_or_default().to_string();
                self.url = parsed.path.unwrap_or_default().to_string();
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
                Err(Error::ProtocolViolation("truncated request head".into()))
            }
            Err(httparse::Error::TooManyHeaders) => Err(Error::HeaderTooLarge),
            Err(error) => Err(Error::ProtocolViolation(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let mut request = HttpRequest::new();
        let wire = b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (consumed, done) = request.advance(wire).unwrap();

        assert!(done);
        assert_eq!(consumed, wire.len());
        assert_eq!(request.method(), "GET");
        assert_eq!(request.url(), "/hello");
        assert_eq!(request.protocol(), "HTTP/1.1");
        assert_eq!(request.header("host"), Some("example.com"));
        assert!(request.body().is_empty());
    }

    #[test]
    fn parse_across_feeds() {
        let mut request = HttpRequest::new();
        let wire = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut done = false;
        let mut offset = 0;
        while offset < wire.len() {
            let (consumed, complete) = request.advance(&wire[offset..offset + 1]).unwrap();
            offset += consumed;
            done = complete;
        }
        assert!(done);
        assert_eq!(request.body(), b"hello");
        assert_eq!(request.cache(), &wire[..]);
    }

    #[test]
    fn parse_chunked_body() {
        let mut request = HttpRequest::new();
        let wire =
            b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let (consumed, done) = request.advance(wire).unwrap();

        assert!(done);
        assert_eq!(consumed, wire.len());
        assert_eq!(request.body(), b"hello");
    }

    #[test]
    fn pipelined_bytes_left_for_next_message() {
        let mut request = HttpRequest::new();
        let wire = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (consumed, done) = request.advance(wire).unwrap();

        assert!(done);
        assert_eq!(request.url(), "/a");
        assert!(consumed < wire.len());

        let mut next = HttpRequest::new();
        let (consumed_next, done_next) = next.advance(&wire[consumed..]).unwrap();
        assert!(done_next);
        assert_eq!(consumed + consumed_next, wire.len());
        assert_eq!(next.url(), "/b");
    }

    #[test]
    fn build_then_parse_roundtrip() {
        let built = HttpRequest::make_post_request("/submit", b"payload", None);
        let mut parsed = HttpRequest::new();
        let (consumed, done) = parsed.advance(built.cache()).unwrap();

        assert!(done);
        assert_eq!(consumed, built.cache().len());
        assert_eq!(parsed.method(), "POST");
        assert_eq!(parsed.url(), "/submit");
        assert_eq!(parsed.header("Content-Type"), Some("text/plain; charset=UTF-8"));
        assert_eq!(parsed.body(), b"payload");
    }

    #[test]
    fn oversized_header_rejected() {
        let mut request = HttpRequest::with_limits(ParseLimits {
            max_header_size: 32,
            max_header_count: 8,
            max_body_size: 0,
        });
        let wire = vec![b'a'; 64];
        assert!(matches!(
            request.advance(&wire),
            Err(Error::HeaderTooLarge)
        ));
        assert!(request.is_error());
    }
}
