//! The RFC 6455 frame codec:
//! `[FIN|RSV1-3|opcode] [MASK|len7] [len16|len64] [mask key] [payload]`.
//! Client-to-server frames are masked with a per-frame random key; frames in
//! the other direction are not. Messages may span several frames through
//! FIN=0 plus continuations; the decoder reassembles them.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    fn from_bits(bits: u8) -> Result<OpCode> {
        match bits {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::UnexpectedOpcode(other)),
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// Which end of the connection this codec instance lives on; decides the
/// masking rules enforced on inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// A fresh random key for one client frame.
pub(crate) fn random_mask() -> [u8; 4] {
    rand::random()
}

pub(crate) fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (index, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[index % 4];
    }
}

/// Serialize one frame into `out`. `mask` must be `Some` exactly for
/// client-originated frames.
pub(crate) fn encode_frame(
    out: &mut Vec<u8>,
    opcode: OpCode,
    fin: bool,
    mask: Option<[u8; 4]>,
    payload: &[u8],
) {
    let first = (fin as u8) << 7 | opcode as u8;
    out.push(first);
    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if payload.len() < 126 {
        out.push(mask_bit | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
}

/// Build a close payload: status code plus UTF-8 reason.
pub(crate) fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// A decoded inbound event. Data frames surface only once a complete
/// message has been reassembled.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WsEvent {
    Message { opcode: OpCode, payload: Vec<u8> },
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: Option<u16>, reason: Vec<u8> },
}

/// Incremental frame decoder. Feed raw transport bytes in, collect events;
/// partial frames are buffered across feeds.
pub(crate) struct FrameDecoder {
    role: Role,
    buffer: Vec<u8>,
    message: Vec<u8>,
    message_opcode: Option<OpCode>,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new(role: Role, max_message_size: usize) -> FrameDecoder {
        FrameDecoder {
            role,
            buffer: Vec::new(),
            message: Vec::new(),
            message_opcode: None,
            max_message_size,
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<WsEvent>> {
        self.buffer.extend_from_slice(data);
        let mut events = Vec::new();
        while let Some((frame_end, fin, opcode, payload)) = self.try_frame()? {
            let mut payload = payload;
            if opcode.is_control() {
                if !fin || payload.len() > 125 {
                    return Err(Error::InvalidFrame(
                        "control frame fragmented or too long".into(),
                    ));
                }
                let event = match opcode {
                    OpCode::Ping => WsEvent::Ping(payload),
                    OpCode::Pong => WsEvent::Pong(payload),
                    OpCode::Close => {
                        let code = if payload.len() >= 2 {
                            Some(u16::from_be_bytes([payload[0], payload[1]]))
                        } else {
                            None
                        };
                        let reason = payload.split_off(payload.len().min(2));
                        WsEvent::Close { code, reason }
                    }
                    _ => unreachable!(),
                };
                events.push(event);
            } else {
                match opcode {
                    OpCode::Continuation => {
                        if self.message_opcode.is_none() {
                            return Err(Error::InvalidFrame(
                                "continuation without a message in progress".into(),
                            ));
                        }
                        self.message.append(&mut payload);
                    }
                    OpCode::Text | OpCode::Binary => {
                        if self.message_opcode.is_some() {
                            return Err(Error::InvalidFrame(
                                "new data frame while a message is in progress".into(),
                            ));
                        }
                        self.message_opcode = Some(opcode);
                        self.message = payload;
                    }
                    _ => unreachable!(),
                }
                if self.max_message_size > 0 && self.message.len() > self.max_message_size {
                    return Err(Error::BufferOverflow);
                }
                if fin {
                    let opcode = self.message_opcode.take().unwrap();
                    events.push(WsEvent::Message {
                        opcode,
                        payload: std::mem::take(&mut self.message),
                    });
                }
            }
            self.buffer.drain(..frame_end);
        }
        Ok(events)
    }

    /// Decode one frame from the front of the buffer, or `None` if it is
    /// still incomplete. Returns (bytes consumed, FIN, opcode, unmasked
    /// payload).
    fn try_frame(&self) -> Result<Option<(usize, bool, OpCode, Vec<u8>)>> {
        let buffer = &self.buffer;
        if buffer.len() < 2 {
            return Ok(None);
        }
        let first = buffer[0];
        if first & 0x70 != 0 {
            return Err(Error::InvalidFrame("reserved bits set".into()));
        }
        let fin = first & 0x80 != 0;
        let opcode = OpCode::from_bits(first & 0x0F)?;
        let masked = buffer[1] & 0x80 != 0;
        match self.role {
            Role::Server if !masked => return Err(Error::UnmaskedClientFrame),
            Role::Client if masked => return Err(Error::MaskedServerFrame),
            _ => {}
        }
        let mut offset = 2;
        let length = match buffer[1] & 0x7F {
            126 => {
                if buffer.len() < offset + 2 {
                    return Ok(None);
                }
                let length = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
                offset += 2;
                length
            }
            127 => {
                if buffer.len() < offset + 8 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buffer[2..10]);
                offset += 8;
                let length = u64::from_be_bytes(bytes);
                if length > usize::MAX as u64 {
                    return Err(Error::InvalidFrame("frame length overflow".into()));
                }
                length as usize
            }
            short => short as usize,
        };
        if self.max_message_size > 0 && length > self.max_message_size {
            return Err(Error::BufferOverflow);
        }
        let mask = if masked {
            if buffer.len() < offset + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buffer[offset..offset + 4]);
            offset += 4;
            Some(key)
        } else {
            None
        };
        if buffer.len() < offset + length {
            return Ok(None);
        }
        let mut payload = buffer[offset..offset + length].to_vec();
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }
        Ok(Some((offset + length, fin, opcode, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_roundtrip() {
        let mut wire = Vec::new();
        let mask = random_mask();
        encode_frame(&mut wire, OpCode::Text, true, Some(mask), b"hello");

        let mut decoder = FrameDecoder::new(Role::Server, 0);
        let events = decoder.feed(&wire).unwrap();
        assert_eq!(
            events,
            vec![WsEvent::Message {
                opcode: OpCode::Text,
                payload: b"hello".to_vec()
            }]
        );
    }

    #[test]
    fn unmasked_roundtrip() {
        let mut wire = Vec::new();
        encode_frame(&mut wire, OpCode::Binary, true, None, &[1, 2, 3]);

        let mut decoder = FrameDecoder::new(Role::Client, 0);
        let events = decoder.feed(&wire).unwrap();
        assert_eq!(
            events,
            vec![WsEvent::Message {
                opcode: OpCode::Binary,
                payload: vec![1, 2, 3]
            }]
        );
    }

    #[test]
    fn extended_lengths() {
        for size in [200usize, 70_000] {
            let payload = vec![0xAB; size];
            let mut wire = Vec::new();
            encode_frame(&mut wire, OpCode::Binary, true, None, &payload);

            let mut decoder = FrameDecoder::new(Role::Client, 0);
            let events = decoder.feed(&wire).unwrap();
            match &events[..] {
                [WsEvent::Message { payload: decoded, .. }] => {
                    assert_eq!(decoded.len(), size)
                }
                other => panic!("unexpected events: {:?}", other),
            }
        }
    }

    #[test]
    fn fragmented_message_reassembled() {
        let mut wire = Vec::new();
        let mask = random_mask();
        encode_frame(&mut wire, OpCode::Text, false, Some(mask), b"hel");
        let mask = random_mask();
        encode_frame(&mut wire, OpCode::Continuation, true, Some(mask), b"lo");

        let mut decoder = FrameDecoder::new(Role::Server, 0);
        // Feed byte by byte: partial frames must buffer cleanly.
        let mut events = Vec::new();
        for byte in &wire {
            events.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(
            events,
            vec![WsEvent::Message {
                opcode: OpCode::Text,
                payload: b"hello".to_vec()
            }]
        );
    }

    #[test]
    fn server_rejects_unmasked_client_frame() {
        let mut wire = Vec::new();
        encode_frame(&mut wire, OpCode::Text, true, None, b"x");

        let mut decoder = FrameDecoder::new(Role::Server, 0);
        assert!(matches!(
            decoder.feed(&wire),
            Err(Error::UnmaskedClientFrame)
        ));
    }

    #[test]
    fn client_rejects_masked_server_frame() {
        let mut wire = Vec::new();
        encode_frame(&mut wire, OpCode::Text, true, Some(random_mask()), b"x");

        let mut decoder = FrameDecoder::new(Role::Client, 0);
        assert!(matches!(decoder.feed(&wire), Err(Error::MaskedServerFrame)));
    }

    #[test]
    fn close_frame_carries_code_and_reason() {
        let mut wire = Vec::new();
        let payload = close_payload(1000, "bye");
        encode_frame(&mut wire, OpCode::Close, true, None, &payload);

        let mut decoder = FrameDecoder::new(Role::Client, 0);
        let events = decoder.feed(&wire).unwrap();
        assert_eq!(
            events,
            vec![WsEvent::Close {
                code: Some(1000),
                reason: b"bye".to_vec()
            }]
        );
    }

    #[test]
    fn fragmented_control_frame_rejected() {
        let mut wire = Vec::new();
        encode_frame(&mut wire, OpCode::Ping, false, Some(random_mask()), b"p");

        let mut decoder = FrameDecoder::new(Role::Server, 0);
        assert!(matches!(decoder.feed(&wire), Err(Error::InvalidFrame(_))));
    }
}
