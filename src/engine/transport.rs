//! Transport abstraction for the engine.io layer.
//!
//! A [`Transport`] is a bidirectional byte-message channel: each call to
//! [`send`](Transport::send) transmits one encoded engine.io frame, and
//! everything the server sends is pushed — one frame per message — into
//! the inbound sink handed over in [`TransportContext`].
//!
//! Connection parameters (base URL, session id) are supplied per session
//! through [`Transport::start`]; the same transport value survives only
//! one session. When the engine upgrades transports, the old instance is
//! stopped and the sink plus close signal are inherited by the new one.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::engine::handshake::Handshake;
use crate::error::{Result, SocketError};

/// Names of the built-in transports as they appear in the handshake's
/// `upgrades` list and in transport URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Polling,
    Websocket,
}

impl TransportKind {
    /// The wire name (`"polling"` / `"websocket"`).
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Polling => "polling",
            TransportKind::Websocket => "websocket",
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "polling" => Some(TransportKind::Polling),
            "websocket" => Some(TransportKind::Websocket),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a transport needs to run one session.
///
/// The inbound sink is capacity-bounded: a slow consumer exerts
/// backpressure on the transport's read loop rather than buffering
/// without limit.
#[derive(Debug, Clone)]
pub struct TransportContext {
    /// Normalized base URL (`http`/`https` scheme, query forced to
    /// `EIO=4`).
    pub url: Url,
    /// Session id negotiated so far; empty before the first handshake.
    pub sid: String,
    /// Sink for inbound byte-messages (one engine.io frame each).
    pub inbound: mpsc::Sender<Vec<u8>>,
    /// One-shot close signal: `None` for an explicit stop, `Some(err)`
    /// for cancellation or a fatal transport error.
    pub on_close: mpsc::Sender<Option<SocketError>>,
    /// Cancellation scope of the owning client.
    pub cancel: CancellationToken,
}

/// An abstract bidirectional byte-message channel.
///
/// # Cancel safety
///
/// Implementations run their receive path inside `tokio::select!`; any
/// await they expose there must be cancel-safe.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The transport's wire name tag.
    fn kind(&self) -> TransportKind;

    /// Start the session: connect if needed and spawn the run loop that
    /// feeds `ctx.inbound` until stopped, cancelled, or broken.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::TransportDial`] when the connection cannot
    /// be established; later failures surface on `ctx.on_close`.
    async fn start(&self, ctx: TransportContext) -> Result<()>;

    /// Ask the server for a handshake. For polling this performs one
    /// immediate GET; transports whose server speaks first implement it
    /// as a no-op.
    async fn request_handshake(&self) -> Result<()>;

    /// Adopt a received handshake (session id, heartbeat cadence).
    fn apply_handshake(&self, handshake: &Handshake);

    /// Send one encoded engine.io frame.
    async fn send(&self, data: Vec<u8>) -> Result<()>;

    /// Stop the run loop. Idempotent and exactly-once: the close signal
    /// is emitted by the run loop, not by this call, and only once per
    /// session.
    async fn stop(&self) -> Result<()>;
}

// ── Shared lifecycle plumbing ───────────────────────────────────────

/// Transport lifecycle, tracked with atomic transitions so `stop` is
/// exactly-once even under concurrent callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Lifecycle {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

#[derive(Debug)]
pub(crate) struct LifecycleState(AtomicU8);

impl LifecycleState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Idle as u8))
    }

    pub(crate) fn get(&self) -> Lifecycle {
        match self.0.load(Ordering::Acquire) {
            0 => Lifecycle::Idle,
            1 => Lifecycle::Running,
            2 => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }

    pub(crate) fn set(&self, state: Lifecycle) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition `from → to`; returns `false` if another caller got
    /// there first.
    pub(crate) fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One-shot stop signal with exactly-once take semantics.
#[derive(Debug)]
pub(crate) struct StopSignal {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl StopSignal {
    /// Create the pair; the receiver goes to the run loop.
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Fire the signal. Later calls are no-ops.
    pub(crate) fn fire(&self) {
        let tx = self.tx.lock().expect("stop signal lock poisoned").take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }
}
