//! socket.io v5 packet model and text wire codec.
//!
//! Wire form: `<kind-digit>[<ns>,][<ack-id>]<body>`. The namespace is
//! present iff it begins with `/` and is terminated by the first `,`;
//! a `[` or `{` ends the scan without consuming anything. The ack id is
//! a maximal run of decimal digits, at most 18. The body is a JSON array
//! for Event/Ack, an opaque UTF-8 string for ConnectError, and an
//! optional JSON value (auth data) for Connect.

use serde_json::Value;

use crate::error::{Result, SocketError};
use crate::payload::{Payload, PayloadParser};

/// Namespace scans stop after this many bytes.
const MAX_NAMESPACE_SCAN: usize = 4096;

/// Longest accepted ack-id digit run.
const MAX_ACK_DIGITS: usize = 18;

/// The default namespace every client starts with.
pub const DEFAULT_NAMESPACE: &str = "/";

/// socket.io packet kinds, wire codes `'0'..'6'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    /// Reserved wire code; parsing one yields an unsupported-feature
    /// error.
    BinaryEvent,
    /// Reserved wire code; parsing one yields an unsupported-feature
    /// error.
    BinaryAck,
}

impl PacketKind {
    fn from_digit(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(PacketKind::Connect),
            b'1' => Some(PacketKind::Disconnect),
            b'2' => Some(PacketKind::Event),
            b'3' => Some(PacketKind::Ack),
            b'4' => Some(PacketKind::ConnectError),
            b'5' => Some(PacketKind::BinaryEvent),
            b'6' => Some(PacketKind::BinaryAck),
            _ => None,
        }
    }

    fn digit(self) -> u8 {
        match self {
            PacketKind::Connect => b'0',
            PacketKind::Disconnect => b'1',
            PacketKind::Event => b'2',
            PacketKind::Ack => b'3',
            PacketKind::ConnectError => b'4',
            PacketKind::BinaryEvent => b'5',
            PacketKind::BinaryAck => b'6',
        }
    }

    fn is_binary(self) -> bool {
        matches!(self, PacketKind::BinaryEvent | PacketKind::BinaryAck)
    }

    /// Kinds whose wire form must carry content after the header.
    fn requires_body(self) -> bool {
        matches!(
            self,
            PacketKind::Event | PacketKind::Ack | PacketKind::ConnectError
        )
    }
}

/// A named event with its ordered payload list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub name: String,
    pub payloads: Vec<Payload>,
}

impl Event {
    /// An event with no payloads yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payloads: Vec::new(),
        }
    }

    /// Append one serialized payload.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Serialization`] if the value cannot be
    /// represented as JSON.
    pub fn with_payload<T: serde::Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.payloads.push(Payload::new(value)?);
        Ok(self)
    }
}

/// One socket.io packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    /// Defaults to [`DEFAULT_NAMESPACE`].
    pub namespace: String,
    pub ack_id: Option<u64>,
    /// Event body; mutually exclusive with `payload`.
    pub event: Option<Event>,
    /// Non-event JSON body (Connect auth data, ConnectError object).
    pub payload: Option<Value>,
    /// Raw ConnectError text.
    pub error_message: Option<String>,
}

impl Packet {
    /// A packet with the given kind on the default namespace.
    pub fn new(kind: PacketKind) -> Self {
        Self {
            kind,
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            event: None,
            payload: None,
            error_message: None,
        }
    }

    /// A Connect packet for `namespace` with optional auth data.
    pub fn connect(namespace: impl Into<String>, auth: Option<Value>) -> Self {
        Self {
            namespace: namespace.into(),
            payload: auth,
            ..Self::new(PacketKind::Connect)
        }
    }

    /// An Event packet for `namespace`.
    pub fn event(namespace: impl Into<String>, event: Event) -> Self {
        Self {
            namespace: namespace.into(),
            event: Some(event),
            ..Self::new(PacketKind::Event)
        }
    }
}

// ── Serialize ───────────────────────────────────────────────────────

/// Encode a packet to its wire bytes.
///
/// The namespace is written only when non-default and non-empty. An auth
/// payload that serializes to `null`, `""`, or `{}` is treated as "no
/// auth data" and elided.
///
/// # Errors
///
/// Binary kinds yield [`SocketError::Unsupported`]; an Event without a
/// non-empty name fails with a parse-package error.
pub fn serialize(packet: &Packet) -> Result<Vec<u8>> {
    if packet.kind.is_binary() {
        return Err(SocketError::Unsupported(
            "binary packets are not supported".into(),
        ));
    }
    if packet.kind == PacketKind::Event {
        let has_name = packet
            .event
            .as_ref()
            .is_some_and(|event| !event.name.is_empty());
        if !has_name {
            return Err(SocketError::parse_package("event requires a non-empty name"));
        }
    }

    let mut wire = String::new();
    wire.push(packet.kind.digit() as char);

    if packet.namespace != DEFAULT_NAMESPACE && !packet.namespace.is_empty() {
        wire.push_str(&packet.namespace);
        wire.push(',');
    }

    if let Some(ack_id) = packet.ack_id {
        wire.push_str(&ack_id.to_string());
    }

    if let Some(event) = &packet.event {
        wire.push('[');
        let mut first = true;
        if !event.name.is_empty() {
            wire.push_str(&serde_json::to_string(&event.name)?);
            first = false;
        }
        for payload in &event.payloads {
            if !first {
                wire.push(',');
            }
            wire.push_str(payload.json());
            first = false;
        }
        wire.push(']');
    } else if let Some(payload) = &packet.payload {
        let json = serde_json::to_string(payload)?;
        if json != "null" && json != "\"\"" && json != "{}" {
            wire.push_str(&json);
        }
    }

    Ok(wire.into_bytes())
}

// ── Parse ───────────────────────────────────────────────────────────

/// Decode a packet from its wire bytes.
///
/// # Errors
///
/// Malformed headers fail with [`crate::error::ProtocolError::ParsePackage`],
/// malformed bodies with [`crate::error::ProtocolError::ParseEvent`], and
/// binary kinds with [`SocketError::Unsupported`].
pub fn parse(data: &[u8], payload_parser: &dyn PayloadParser) -> Result<Packet> {
    let (&first, mut rest) = data
        .split_first()
        .ok_or_else(|| SocketError::parse_package("empty message"))?;
    let kind = PacketKind::from_digit(first)
        .ok_or_else(|| SocketError::parse_package(format!("invalid packet kind byte {first:#04x}")))?;

    if kind.is_binary() {
        return Err(SocketError::Unsupported(
            "binary packets are not supported".into(),
        ));
    }

    let mut packet = Packet::new(kind);

    if rest.is_empty() {
        if kind.requires_body() {
            return Err(SocketError::parse_package("wrong package payload"));
        }
        return Ok(packet);
    }

    // Custom namespace always starts with '/'; it is consumed only when
    // terminated by ','.
    if rest[0] == b'/' {
        let limit = rest.len().min(MAX_NAMESPACE_SCAN);
        let mut terminated = false;
        for i in 0..limit {
            match rest[i] {
                b',' => {
                    let namespace = std::str::from_utf8(&rest[..i])
                        .map_err(|_| SocketError::parse_package("namespace is not UTF-8"))?;
                    packet.namespace = namespace.to_string();
                    rest = &rest[i + 1..];
                    terminated = true;
                    break;
                }
                b'[' | b'{' => {
                    terminated = true;
                    break;
                }
                _ => {}
            }
        }
        if !terminated && rest.len() > MAX_NAMESPACE_SCAN {
            return Err(SocketError::parse_package("namespace exceeds scan limit"));
        }
    }

    if rest.is_empty() {
        if kind.requires_body() {
            return Err(SocketError::parse_package("wrong package payload"));
        }
        return Ok(packet);
    }

    // Maximal decimal-digit prefix is the ack id.
    let mut digits = 0usize;
    let mut ack_id: u64 = 0;
    while digits < rest.len() && rest[digits].is_ascii_digit() {
        digits += 1;
        if digits > MAX_ACK_DIGITS {
            return Err(SocketError::parse_package("ack id exceeds 18 digits"));
        }
        ack_id = ack_id * 10 + u64::from(rest[digits - 1] - b'0');
    }
    if digits > 0 {
        packet.ack_id = Some(ack_id);
        rest = &rest[digits..];
    }

    if rest.is_empty() {
        if kind.requires_body() {
            return Err(SocketError::parse_package("wrong package payload"));
        }
        return Ok(packet);
    }

    match kind {
        PacketKind::Event | PacketKind::Ack => {
            packet.event = Some(payload_parser.parse_event(rest, kind == PacketKind::Ack)?);
        }
        PacketKind::ConnectError => {
            let text = std::str::from_utf8(rest)
                .map_err(|_| SocketError::parse_package("error message is not UTF-8"))?;
            // The body may be raw text or a JSON value; keep both views.
            packet.payload = serde_json::from_str::<Value>(text).ok();
            packet.error_message = Some(text.to_string());
        }
        PacketKind::Connect | PacketKind::Disconnect => {
            let value: Value = serde_json::from_slice(rest)
                .map_err(|e| SocketError::parse_package(format!("invalid packet body: {e}")))?;
            packet.payload = Some(value);
        }
        PacketKind::BinaryEvent | PacketKind::BinaryAck => unreachable!("rejected above"),
    }

    Ok(packet)
}
