//! engine.io v4 frame codec.
//!
//! One frame per byte-message on the wire: a single ASCII digit for the
//! frame kind followed by the opaque payload bytes. There is no other
//! framing; message boundaries come from the transport (one HTTP body or
//! one WebSocket text frame per engine.io frame).

use crate::error::{Result, SocketError};

/// Refuse to encode payloads above this size.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// engine.io frame kinds, wire codes `'0'..'6'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Open,
    Close,
    Ping,
    Pong,
    Message,
    Upgrade,
    Noop,
}

impl FrameKind {
    fn from_digit(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(FrameKind::Open),
            b'1' => Some(FrameKind::Close),
            b'2' => Some(FrameKind::Ping),
            b'3' => Some(FrameKind::Pong),
            b'4' => Some(FrameKind::Message),
            b'5' => Some(FrameKind::Upgrade),
            b'6' => Some(FrameKind::Noop),
            _ => None,
        }
    }

    fn digit(self) -> u8 {
        match self {
            FrameKind::Open => b'0',
            FrameKind::Close => b'1',
            FrameKind::Ping => b'2',
            FrameKind::Pong => b'3',
            FrameKind::Message => b'4',
            FrameKind::Upgrade => b'5',
            FrameKind::Noop => b'6',
        }
    }
}

/// One engine.io frame: a kind plus opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// A frame with no payload.
    pub fn empty(kind: FrameKind) -> Self {
        Self {
            kind,
            data: Vec::new(),
        }
    }

    /// A Message frame carrying upper-layer bytes.
    pub fn message(data: Vec<u8>) -> Self {
        Self::new(FrameKind::Message, data)
    }
}

/// Decode one frame from its wire bytes.
///
/// # Errors
///
/// Returns a parse error for empty input or a kind byte outside
/// `'0'..'6'`.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    let (&first, rest) = bytes
        .split_first()
        .ok_or_else(|| SocketError::parse_package("empty engine.io frame"))?;
    let kind = FrameKind::from_digit(first)
        .ok_or_else(|| SocketError::parse_package(format!("invalid frame kind byte {first:#04x}")))?;
    Ok(Frame {
        kind,
        data: rest.to_vec(),
    })
}

/// Encode one frame to its wire bytes. Exact inverse of [`decode`].
///
/// # Errors
///
/// Returns [`SocketError::Unsupported`] if the payload exceeds
/// [`MAX_PAYLOAD_LEN`].
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    if frame.data.len() > MAX_PAYLOAD_LEN {
        return Err(SocketError::Unsupported(format!(
            "frame payload of {} bytes exceeds the {} byte limit",
            frame.data.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    let mut wire = Vec::with_capacity(1 + frame.data.len());
    wire.push(frame.kind.digit());
    wire.extend_from_slice(&frame.data);
    Ok(wire)
}
