//! Shared pieces of the incremental HTTP parsers: head-terminator scanning,
//! body-framing selection, and the chunked transfer decoder.

use crate::error::{Error, Result};

/// Limits applied while parsing a message. Zero `max_body_size` means
/// unlimited.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_header_size: usize,
    pub max_header_count: usize,
    pub max_body_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        ParseLimits {
            max_header_size: crate::defaults::max_header_size(),
            max_header_count: crate::defaults::max_header_count(),
            max_body_size: crate::defaults::max_body_size(),
        }
    }
}

/// Find the end of the header block (the index just past `\r\n\r\n`),
/// scanning from `from` so repeated calls do not rescan the prefix.
pub(crate) fn find_head_end(data: &[u8], from: usize) -> Option<usize> {
    let start = from.saturating_sub(3);
    data[start..]
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|position| start + position + 4)
}

/// How the message body is delimited, per RFC 7230 §3.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    None,
    Length(usize),
    Chunked,
}

pub(crate) fn body_framing(headers: &[(String, String)]) -> Result<BodyFraming> {
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Ok(BodyFraming::Chunked);
        }
        if name.eq_ignore_ascii_case("content-length") {
            let length = value
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::ProtocolViolation("invalid Content-Length".into()))?;
            return Ok(BodyFraming::Length(length));
        }
    }
    Ok(BodyFraming::None)
}

const MAX_CHUNK_LINE: usize = 128;

enum ChunkState {
    Size,
    Data { remaining: usize },
    DataCrlf { skipped: usize },
    Trailer,
    Done,
}

/// Incremental decoder for `Transfer-Encoding: chunked` bodies: hex-length
/// line, data, CRLF, repeated, terminated by a zero-length chunk and a blank
/// line.
pub(crate) struct ChunkDecoder {
    state: ChunkState,
    line: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> ChunkDecoder {
        ChunkDecoder {
            state: ChunkState::Size,
            line: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ChunkState::Done)
    }

    /// Consume as much of `data` as possible, appending decoded bytes to
    /// `out`. Returns the number of input bytes consumed.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        let mut consumed = 0;
        while consumed < data.len() {
            match self.state {
                ChunkState::Size | ChunkState::Trailer => {
                    let newline = data[consumed..].iter().position(|byte| *byte == b'\n');
                    let taken = match newline {
                        Some(position) => position + 1,
                        None => data.len() - consumed,
                    };
                    if self.line.len() + taken > MAX_CHUNK_LINE {
                        return Err(Error::ProtocolViolation("chunk line too long".into()));
                    }
                    self.line.extend_from_slice(&data[consumed..consumed + taken]);
                    consumed += taken;
                    if newline.is_none() {
                        break;
                    }
                    let line = std::mem::take(&mut self.line);
                    let line = trim_crlf(&line);
                    match self.state {
                        ChunkState::Size => {
                            let size = parse_chunk_size(line)?;
                            self.state = if size == 0 {
                                ChunkState::Trailer
                            } else {
                                ChunkState::Data { remaining: size }
                            };
                        }
                        ChunkState::Trailer => {
                            // Trailer section ends at the first blank line.
                            if line.is_empty() {
                                self.state = ChunkState::Done;
                                break;
                            }
                        }
                        _ => unreachable!(),
                    }
                }
                ChunkState::Data { remaining } => {
                    let taken = remaining.min(data.len() - consumed);
                    out.extend_from_slice(&data[consumed..consumed + taken]);
                    consumed += taken;
                    let remaining = remaining - taken;
                    self.state = if remaining == 0 {
                        ChunkState::DataCrlf { skipped: 0 }
                    } else {
                        ChunkState::Data { remaining }
                    };
                }
                ChunkState::DataCrlf { skipped } => {
                    let expected = [b'\r', b'\n'];
                    if data[consumed] != expected[skipped] {
                        return Err(Error::ProtocolViolation(
                            "missing CRLF after chunk data".into(),
                        ));
                    }
                    consumed += 1;
                    self.state = if skipped == 1 {
                        ChunkState::Size
                    } else {
                        ChunkState::DataCrlf { skipped: 1 }
                    };
                }
                ChunkState::Done => break,
            }
        }
        Ok(consumed)
    }
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    // Chunk extensions after ';' are tolerated and ignored.
    let digits = line
        .split(|byte| *byte == b';')
        .next()
        .unwrap_or_default();
    let digits = std::str::from_utf8(digits)
        .map_err(|_| Error::ProtocolViolation("invalid chunk size".into()))?
        .trim();
    usize::from_str_radix(digits, 16)
        .map_err(|_| Error::ProtocolViolation("invalid chunk size".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_end_detection() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\n", 0), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n", 0), None);
        // Terminator split across feeds: rescan catches it.
        let full = b"a: b\r\n\r\nrest";
        assert_eq!(find_head_end(full, 7), Some(8));
    }

    #[test]
    fn framing_selection() {
        let headers = vec![("Content-Length".to_string(), "42".to_string())];
        assert_eq!(body_framing(&headers).unwrap(), BodyFraming::Length(42));

        let headers = vec![("Transfer-Encoding".to_string(), "chunked".to_string())];
        assert_eq!(body_framing(&headers).unwrap(), BodyFraming::Chunked);

        assert_eq!(body_framing(&[]).unwrap(), BodyFraming::None);

        let headers = vec![("Content-Length".to_string(), "nope".to_string())];
        assert!(body_framing(&headers).is_err());
    }

    #[test]
    fn chunked_decode_whole() {
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        let wire = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let consumed = decoder.feed(wire, &mut out).unwrap();
        assert_eq!(consumed, wire.len());
        assert!(decoder.is_done());
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn chunked_decode_split_feeds() {
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        let wire = b"5\r\nhello\r\n0\r\n\r\n";
        for byte in wire.iter() {
            decoder.feed(std::slice::from_ref(byte), &mut out).unwrap();
        }
        assert!(decoder.is_done());
        assert_eq!(out, b"hello");
    }

    #[test]
    fn chunked_rejects_bad_size() {
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        assert!(decoder.feed(b"zz\r\n", &mut out).is_err());
    }
}
