//! Error types for the socket.io client.

use thiserror::Error;

/// Errors that can occur when using the socket.io client.
#[derive(Debug, Error)]
pub enum SocketError {
    /// A construction-time invariant was violated (missing URL, invalid
    /// scheme, both a URL and a pre-built engine supplied, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// The initial transport setup failed. Surfaced from `connect`.
    #[error("transport dial error: {0}")]
    TransportDial(String),

    /// A malformed frame was received or produced.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A wire feature this client does not implement (binary packet
    /// variants, unknown upgrade targets).
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// The server's Open frame was not a valid handshake.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// An acknowledgement handler could not be bound.
    ///
    /// Reserved: with statically typed handlers every shape accepted by
    /// the API is bindable, so this is only produced by bindings that
    /// cannot be checked at compile time.
    #[error("ack callback is not bindable")]
    BadCallback,

    /// An event object was combined with positional payloads in one
    /// `emit` call.
    #[error("an event value cannot be combined with positional payloads")]
    MixedEventForm,

    /// The client's cancellation token was triggered.
    #[error("client cancelled")]
    Cancelled,

    /// An error propagated from the underlying HTTP or WebSocket stack.
    #[error("transport I/O error: {0}")]
    TransportIo(String),

    /// Failed to serialize or deserialize a JSON payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Protocol-level parse failures, split by failure site.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The packet header (kind digit, namespace, ack id) was malformed.
    #[error("parse package error: {0}")]
    ParsePackage(String),

    /// The packet body (event array, payload list) was malformed.
    #[error("parse event error: {0}")]
    ParseEvent(String),
}

impl SocketError {
    /// Shorthand for a [`ProtocolError::ParsePackage`] wrapped in
    /// [`SocketError::Protocol`].
    pub(crate) fn parse_package(msg: impl Into<String>) -> Self {
        SocketError::Protocol(ProtocolError::ParsePackage(msg.into()))
    }

    /// Shorthand for a [`ProtocolError::ParseEvent`] wrapped in
    /// [`SocketError::Protocol`].
    pub(crate) fn parse_event(msg: impl Into<String>) -> Self {
        SocketError::Protocol(ProtocolError::ParseEvent(msg.into()))
    }
}

/// A specialized [`Result`] type for socket.io client operations.
pub type Result<T> = std::result::Result<T, SocketError>;
