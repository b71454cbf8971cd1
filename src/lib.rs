//! # socket.io client
//!
//! Async client for the socket.io v5 protocol over engine.io v4.
//!
//! The crate is split in two layers. The [`engine`] module owns the
//! byte-message session: transport selection (HTTP long-polling or
//! WebSocket), the handshake, the probe-based transport upgrade, and the
//! ping/pong liveness exchange. On top of it, [`Client`] multiplexes
//! named event streams across namespaces, supports request/response
//! acknowledgements with optional timeouts, and delivers typed payloads
//! to user callbacks.
//!
//! ## Features
//!
//! - **Typed handlers** — register closures with positional typed
//!   parameters; payloads are decoded per call, no reflection
//! - **Transport upgrade** — starts on long-polling and upgrades to
//!   WebSocket when the server offers it; sends queued during the swap
//!   flush in order afterwards
//! - **Pluggable seams** — HTTP client, WebSocket connector, payload
//!   parser, and timer are traits with production defaults
//! - **No built-in reconnection** — lifecycle hooks are exposed so a
//!   policy can be layered above the core
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use socketio_client::{Client, EmitOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> socketio_client::Result<()> {
//! let client = Client::builder()
//!     .with_raw_url("http://127.0.0.1:3001")
//!     .with_handshake_data(serde_json::json!({ "userName": "Varvar" }))
//!     .build()?;
//!
//! client.on("connect", || println!("connected"));
//! client.on("result", |operation: String, result: i64| {
//!     println!("{operation} = {result}");
//! });
//!
//! client.connect(CancellationToken::new()).await?;
//!
//! client
//!     .emit_with(
//!         "hi",
//!         EmitOptions::new().with_ack(|reply: String| println!("server said: {reply}")),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod handler;
pub mod packet;
pub mod payload;
pub mod timer;

mod ack;
mod latch;
mod namespace;

// Re-export primary types for ergonomic imports.
pub use client::{
    Client, ClientBuilder, EmitOptions, TryIntoEvent, EVENT_CONNECT, EVENT_DISCONNECT, EVENT_ERROR,
};
pub use engine::{EngineClient, EngineClientBuilder, Handshake, Transport, TransportKind};
pub use error::{ProtocolError, Result, SocketError};
pub use handler::{IntoEventHandler, RawHandler};
pub use packet::{Event, Packet, PacketKind, DEFAULT_NAMESPACE};
pub use payload::{Payload, PayloadParser, StrictParser, TolerantParser};
pub use timer::{Timer, TokioTimer};
