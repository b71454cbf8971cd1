//! Event payload values and the pluggable payload parser.
//!
//! A [`Payload`] is one element of an event's JSON array, kept as raw
//! JSON text so decoding into a caller-declared type is deferred until a
//! typed handler runs. Two interchangeable [`PayloadParser`]s are
//! provided: [`TolerantParser`] scans the array by hand and captures each
//! element as a raw substring, [`StrictParser`] leans on `serde_json`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::error::{Result, SocketError};
use crate::packet::Event;

/// One event payload, held as raw JSON.
///
/// Equality compares the raw JSON text; callers that need structural
/// equality should compare decoded values.
#[derive(Debug, Clone)]
pub struct Payload(Box<RawValue>);

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

impl Eq for Payload {}

impl Payload {
    /// Serialize a value into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Serialization`] if the value cannot be
    /// represented as JSON.
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let json = serde_json::to_string(value)?;
        Ok(Self(RawValue::from_string(json)?))
    }

    /// Wrap a string that is already JSON. Validates the text.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Serialization`] if the text is not valid
    /// JSON.
    pub fn from_json(json: impl Into<String>) -> Result<Self> {
        Ok(Self(RawValue::from_string(json.into())?))
    }

    pub(crate) fn from_raw(raw: Box<RawValue>) -> Self {
        Self(raw)
    }

    /// Decode the payload into a caller-declared type.
    ///
    /// Every call decodes afresh; decoded values never alias between
    /// invocations.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Serialization`] if the JSON does not match
    /// the requested type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.0.get())?)
    }

    /// The raw JSON text.
    pub fn json(&self) -> &str {
        self.0.get()
    }
}

/// Parses the JSON body of an Event or Ack packet into an [`Event`].
///
/// The body must be a JSON array; for events (not acks) its first
/// element must be a string, the event name. Embedded whitespace between
/// elements is accepted.
pub trait PayloadParser: Send + Sync {
    /// Parse `[name?, p1, p2, ...]`. With `is_ack` the leading name
    /// element is absent and the whole array is payloads.
    fn parse_event(&self, data: &[u8], is_ack: bool) -> Result<Event>;
}

// ── Strict parser ───────────────────────────────────────────────────

/// [`PayloadParser`] built directly on `serde_json`: the body must be a
/// single well-formed JSON array with nothing trailing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictParser;

impl PayloadParser for StrictParser {
    fn parse_event(&self, data: &[u8], is_ack: bool) -> Result<Event> {
        let elements: Vec<Box<RawValue>> = serde_json::from_slice(data)
            .map_err(|e| SocketError::parse_event(format!("not a JSON array: {e}")))?;
        let mut elements = elements.into_iter();

        let name = if is_ack {
            String::new()
        } else {
            let raw = elements
                .next()
                .ok_or_else(|| SocketError::parse_event("missing event name"))?;
            serde_json::from_str::<String>(raw.get())
                .map_err(|_| SocketError::parse_event("event name is not a string"))?
        };

        Ok(Event {
            name,
            payloads: elements.map(Payload::from_raw).collect(),
        })
    }
}

// ── Tolerant parser ─────────────────────────────────────────────────

/// Hand-rolled [`PayloadParser`] that captures each array element as a
/// raw substring without building intermediate values.
#[derive(Debug, Clone, Copy, Default)]
pub struct TolerantParser;

impl PayloadParser for TolerantParser {
    fn parse_event(&self, data: &[u8], is_ack: bool) -> Result<Event> {
        let text = std::str::from_utf8(data)
            .map_err(|_| SocketError::parse_event("event body is not UTF-8"))?;
        let mut scanner = Scanner::new(text);

        scanner.skip_whitespace();
        if !scanner.eat(b'[') {
            return Err(SocketError::parse_event("can't find event entity start"));
        }

        let mut elements: Vec<&str> = Vec::new();
        scanner.skip_whitespace();
        if !scanner.eat(b']') {
            loop {
                elements.push(scanner.next_value()?);
                scanner.skip_whitespace();
                if scanner.eat(b',') {
                    scanner.skip_whitespace();
                    continue;
                }
                if scanner.eat(b']') {
                    break;
                }
                return Err(SocketError::parse_event("expected ',' or ']' in event array"));
            }
        }
        scanner.skip_whitespace();
        if !scanner.at_end() {
            return Err(SocketError::parse_event("trailing data after event array"));
        }

        let mut elements = elements.into_iter();
        let name = if is_ack {
            String::new()
        } else {
            let raw = elements
                .next()
                .ok_or_else(|| SocketError::parse_event("missing event name"))?;
            serde_json::from_str::<String>(raw)
                .map_err(|_| SocketError::parse_event("event name is not a string"))?
        };

        let payloads = elements
            .map(|raw| {
                Payload::from_json(raw).map_err(|e| {
                    SocketError::parse_event(format!("invalid payload element: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Event { name, payloads })
    }
}

/// Byte-level cursor over the event body.
struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume one JSON value and return its raw text.
    fn next_value(&mut self) -> Result<&'a str> {
        self.skip_whitespace();
        let start = self.pos;
        match self.peek() {
            Some(b'"') => self.skip_string()?,
            Some(b'[' | b'{') => self.skip_composite()?,
            Some(_) => self.skip_scalar(),
            None => return Err(SocketError::parse_event("unterminated event array")),
        }
        Ok(&self.text[start..self.pos])
    }

    /// Skip a JSON string including escape sequences.
    fn skip_string(&mut self) -> Result<()> {
        self.pos += 1; // opening quote
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(b'\\') => {
                    // Escape: skip the backslash and the escaped byte.
                    self.pos += 2;
                }
                Some(_) => self.pos += 1,
                None => return Err(SocketError::parse_event("unterminated string")),
            }
        }
    }

    /// Skip a nested array or object, tracking bracket depth and
    /// ignoring brackets inside strings.
    fn skip_composite(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Some(b'"') => self.skip_string()?,
                Some(b'[' | b'{') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(b']' | b'}') => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => self.pos += 1,
                None => return Err(SocketError::parse_event("unterminated composite value")),
            }
        }
    }

    /// Skip a scalar (number, boolean, null) up to the next delimiter.
    fn skip_scalar(&mut self) {
        while let Some(byte) = self.peek() {
            if matches!(byte, b',' | b']' | b'}' | b' ' | b'\t' | b'\n' | b'\r') {
                break;
            }
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsers() -> Vec<Box<dyn PayloadParser>> {
        vec![Box::new(TolerantParser), Box::new(StrictParser)]
    }

    #[test]
    fn parses_event_with_payloads() {
        for parser in parsers() {
            let event = parser
                .parse_event(br#"["message","hello",42]"#, false)
                .unwrap();
            assert_eq!(event.name, "message");
            assert_eq!(event.payloads.len(), 2);
            assert_eq!(event.payloads[0].decode::<String>().unwrap(), "hello");
            assert_eq!(event.payloads[1].decode::<u32>().unwrap(), 42);
        }
    }

    #[test]
    fn parses_event_without_payloads() {
        for parser in parsers() {
            let event = parser.parse_event(br#"["hi"]"#, false).unwrap();
            assert_eq!(event.name, "hi");
            assert!(event.payloads.is_empty());
        }
    }

    #[test]
    fn ack_array_is_all_payloads() {
        for parser in parsers() {
            let event = parser.parse_event(br#"["pong",1]"#, true).unwrap();
            assert!(event.name.is_empty());
            assert_eq!(event.payloads.len(), 2);
            assert_eq!(event.payloads[0].decode::<String>().unwrap(), "pong");
        }
    }

    #[test]
    fn accepts_embedded_whitespace() {
        for parser in parsers() {
            let event = parser
                .parse_event(b"[ \"evt\" ,\t{\"a\": 1} ,\n[1, 2] ]", false)
                .unwrap();
            assert_eq!(event.name, "evt");
            assert_eq!(event.payloads.len(), 2);
            assert_eq!(
                event.payloads[0].decode::<serde_json::Value>().unwrap(),
                serde_json::json!({"a": 1})
            );
            assert_eq!(
                event.payloads[1].decode::<Vec<u32>>().unwrap(),
                vec![1, 2]
            );
        }
    }

    #[test]
    fn rejects_non_array_body() {
        for parser in parsers() {
            assert!(parser.parse_event(br#"{"not":"array"}"#, false).is_err());
            assert!(parser.parse_event(b"42", true).is_err());
        }
    }

    #[test]
    fn rejects_non_string_event_name() {
        for parser in parsers() {
            assert!(parser.parse_event(br#"[42,"x"]"#, false).is_err());
        }
    }

    #[test]
    fn rejects_empty_array_for_event() {
        for parser in parsers() {
            assert!(parser.parse_event(b"[]", false).is_err());
            // But an ack can carry zero payloads.
            let event = parser.parse_event(b"[]", true).unwrap();
            assert!(event.payloads.is_empty());
        }
    }

    #[test]
    fn captures_nested_composites_raw() {
        for parser in parsers() {
            let event = parser
                .parse_event(br#"["e",{"deep":[1,{"x":"]"}]}]"#, false)
                .unwrap();
            assert_eq!(
                event.payloads[0].decode::<serde_json::Value>().unwrap(),
                serde_json::json!({"deep": [1, {"x": "]"}]})
            );
        }
    }

    #[test]
    fn tolerant_rejects_trailing_garbage() {
        assert!(TolerantParser.parse_event(br#"["e"] trailing"#, false).is_err());
    }

    #[test]
    fn payload_round_trips_values() {
        let payload = Payload::new(&serde_json::json!({"k": [1, 2, 3]})).unwrap();
        assert_eq!(
            payload.decode::<serde_json::Value>().unwrap(),
            serde_json::json!({"k": [1, 2, 3]})
        );
    }

    #[test]
    fn payload_from_json_validates() {
        assert!(Payload::from_json("{\"ok\":true}").is_ok());
        assert!(Payload::from_json("not json").is_err());
    }
}
