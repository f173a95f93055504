use axum::extract::ws::{self, CloseFrame};
use bytes::{BufMut, Bytes, BytesMut};

/// Close code sent when the hub goes away (shutdown, eviction).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent when a connection is refused because the hub is full.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Frame-level tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
    /// Any opcode the hub does not understand. Readers discard these.
    Other(u8),
}

/// A single frame as seen by the hub: an opcode plus an opaque payload.
///
/// CLOSE payloads use the WebSocket layout: a big-endian status code
/// followed by a UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Message {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, payload)
    }

    pub fn ping() -> Self {
        Self::new(OpCode::Ping, Bytes::new())
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, payload)
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut buf = BytesMut::with_capacity(2 + reason.len());
        buf.put_u16(code);
        buf.put_slice(reason.as_bytes());
        Self::new(OpCode::Close, buf.freeze())
    }

    pub fn is_close(&self) -> bool {
        self.opcode == OpCode::Close
    }

    /// Status code of a CLOSE frame, if it carries one.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    /// Reason text of a CLOSE frame; empty when absent.
    pub fn close_reason(&self) -> String {
        if self.opcode != OpCode::Close || self.payload.len() <= 2 {
            return String::new();
        }
        String::from_utf8_lossy(&self.payload[2..]).into_owned()
    }
}

impl From<ws::Message> for Message {
    fn from(msg: ws::Message) -> Self {
        match msg {
            ws::Message::Text(text) => {
                Message::text(Bytes::copy_from_slice(text.as_str().as_bytes()))
            }
            ws::Message::Binary(data) => Message::binary(data),
            ws::Message::Ping(data) => Message::new(OpCode::Ping, data),
            ws::Message::Pong(data) => Message::pong(data),
            ws::Message::Close(Some(frame)) => Message::close(frame.code, frame.reason.as_str()),
            ws::Message::Close(None) => Message::new(OpCode::Close, Bytes::new()),
        }
    }
}

impl From<Message> for ws::Message {
    fn from(msg: Message) -> Self {
        match msg.opcode {
            OpCode::Text => {
                ws::Message::Text(String::from_utf8_lossy(&msg.payload).into_owned().into())
            }
            OpCode::Binary => ws::Message::Binary(msg.payload),
            OpCode::Ping => ws::Message::Ping(msg.payload),
            OpCode::Pong => ws::Message::Pong(msg.payload),
            OpCode::Close => {
                let frame = msg.close_code().map(|code| CloseFrame {
                    code,
                    reason: msg.close_reason().into(),
                });
                ws::Message::Close(frame)
            }
            // Unknown opcodes never leave the hub; send them as binary if they do.
            OpCode::Other(_) => ws::Message::Binary(msg.payload),
        }
    }
}
