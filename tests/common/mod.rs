#![allow(dead_code)]
//! Shared test utilities for the integration tests.
//!
//! Provides a scriptable [`MockTransport`] implementing the engine
//! transport seam, a hand-driven [`ManualTimer`], and helpers for
//! building wire frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use url::Url;

use socketio_client::engine::transport::TransportContext;
use socketio_client::engine::Handshake;
use socketio_client::{SocketError, Timer, Transport, TransportKind};

// ── MockTransport ───────────────────────────────────────────────────

struct SessionHandles {
    inbound: mpsc::Sender<Vec<u8>>,
    on_close: mpsc::Sender<Option<SocketError>>,
    cancel: CancellationToken,
    sid: String,
}

struct MockShared {
    kind: TransportKind,
    /// Frames injected into the inbound sink when `start` runs
    /// (websocket-style: the server speaks first).
    on_start: StdMutex<VecDeque<Vec<u8>>>,
    /// Frames injected on `request_handshake` (polling-style: the
    /// handshake is the response to the first GET).
    on_handshake_request: StdMutex<VecDeque<Vec<u8>>>,
    sent: StdMutex<Vec<Vec<u8>>>,
    handshakes: StdMutex<Vec<Handshake>>,
    session: StdMutex<Option<SessionHandles>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    stopped: AtomicBool,
}

/// A scriptable in-memory [`Transport`].
///
/// Scripted frames are delivered at `start` / `request_handshake`; the
/// paired [`MockHandle`] injects further frames and inspects recorded
/// sends.
pub struct MockTransport {
    shared: Arc<MockShared>,
}

/// Test-side handle for a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> (Arc<Self>, MockHandle) {
        let shared = Arc::new(MockShared {
            kind,
            on_start: StdMutex::new(VecDeque::new()),
            on_handshake_request: StdMutex::new(VecDeque::new()),
            sent: StdMutex::new(Vec::new()),
            handshakes: StdMutex::new(Vec::new()),
            session: StdMutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        });
        (
            Arc::new(Self {
                shared: Arc::clone(&shared),
            }),
            MockHandle { shared },
        )
    }

    /// A polling-style mock whose first handshake request is answered
    /// with `frame`.
    pub fn polling_with_handshake(frame: Vec<u8>) -> (Arc<Self>, MockHandle) {
        let (transport, handle) = Self::new(TransportKind::Polling);
        handle
            .shared
            .on_handshake_request
            .lock()
            .unwrap()
            .push_back(frame);
        (transport, handle)
    }

    /// A websocket-style mock that delivers `frame` spontaneously when
    /// the session starts.
    pub fn websocket_with_open(frame: Vec<u8>) -> (Arc<Self>, MockHandle) {
        let (transport, handle) = Self::new(TransportKind::Websocket);
        handle.shared.on_start.lock().unwrap().push_back(frame);
        (transport, handle)
    }
}

impl MockHandle {
    /// Push one frame into the engine's inbound channel.
    pub async fn inject(&self, frame: &[u8]) {
        let inbound = {
            let session = self.shared.session.lock().unwrap();
            session
                .as_ref()
                .expect("mock transport not started")
                .inbound
                .clone()
        };
        inbound
            .send(frame.to_vec())
            .await
            .expect("inbound channel closed");
    }

    /// Emit an error (or `None`) on the close signal, as a run loop
    /// would for a fatal transport error.
    pub async fn emit_close(&self, error: Option<SocketError>) {
        let on_close = {
            let session = self.shared.session.lock().unwrap();
            session
                .as_ref()
                .expect("mock transport not started")
                .on_close
                .clone()
        };
        let _ = on_close.send(error).await;
    }

    /// Everything the engine sent on this transport, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.shared.sent.lock().unwrap().clone()
    }

    /// Handshakes applied via `apply_handshake`.
    pub fn applied_handshakes(&self) -> Vec<Handshake> {
        self.shared.handshakes.lock().unwrap().clone()
    }

    /// The sid the engine supplied at the most recent `start`.
    pub fn session_sid(&self) -> Option<String> {
        self.shared
            .session
            .lock()
            .unwrap()
            .as_ref()
            .map(|session| session.sid.clone())
    }

    pub fn starts(&self) -> usize {
        self.shared.starts.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> usize {
        self.shared.stops.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.shared.kind
    }

    async fn start(&self, ctx: TransportContext) -> Result<(), SocketError> {
        let inbound = ctx.inbound.clone();
        *self.shared.session.lock().unwrap() = Some(SessionHandles {
            inbound: ctx.inbound,
            on_close: ctx.on_close,
            cancel: ctx.cancel,
            sid: ctx.sid,
        });
        self.shared.starts.fetch_add(1, Ordering::Relaxed);
        self.shared.stopped.store(false, Ordering::Relaxed);

        let frames: Vec<Vec<u8>> = self.shared.on_start.lock().unwrap().drain(..).collect();
        for frame in frames {
            inbound.send(frame).await.expect("inbound channel closed");
        }
        Ok(())
    }

    async fn request_handshake(&self) -> Result<(), SocketError> {
        let inbound = {
            let session = self.shared.session.lock().unwrap();
            session
                .as_ref()
                .expect("request_handshake before start")
                .inbound
                .clone()
        };
        let frames: Vec<Vec<u8>> = self
            .shared
            .on_handshake_request
            .lock()
            .unwrap()
            .drain(..)
            .collect();
        for frame in frames {
            inbound.send(frame).await.expect("inbound channel closed");
        }
        Ok(())
    }

    fn apply_handshake(&self, handshake: &Handshake) {
        self.shared.handshakes.lock().unwrap().push(handshake.clone());
    }

    async fn send(&self, data: Vec<u8>) -> Result<(), SocketError> {
        self.shared.sent.lock().unwrap().push(data);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SocketError> {
        if self.shared.stopped.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        self.shared.stops.fetch_add(1, Ordering::Relaxed);
        let on_close = {
            let session = self.shared.session.lock().unwrap();
            session.as_ref().map(|session| session.on_close.clone())
        };
        if let Some(on_close) = on_close {
            // A real run loop emits the close signal on its way out;
            // explicit stops carry no error.
            let _ = on_close.send(None).await;
        }
        Ok(())
    }
}

// ── ManualTimer ─────────────────────────────────────────────────────

/// A [`Timer`] that only fires when the test says so.
#[derive(Clone, Default)]
pub struct ManualTimer {
    notify: Arc<Notify>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every outstanding `after` future.
    pub fn fire(&self) {
        self.notify.notify_waiters();
    }
}

impl Timer for ManualTimer {
    fn after(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        let notify = Arc::clone(&self.notify);
        Box::pin(async move {
            notify.notified().await;
        })
    }
}

// ── Wire helpers ────────────────────────────────────────────────────

/// An engine.io Open frame carrying a handshake record.
pub fn handshake_frame(
    sid: &str,
    upgrades: &[&str],
    ping_interval: u64,
    ping_timeout: u64,
) -> Vec<u8> {
    let upgrades: Vec<String> = upgrades.iter().map(|s| s.to_string()).collect();
    let body = serde_json::json!({
        "sid": sid,
        "upgrades": upgrades,
        "pingInterval": ping_interval,
        "pingTimeout": ping_timeout,
    });
    let mut frame = b"0".to_vec();
    frame.extend_from_slice(body.to_string().as_bytes());
    frame
}

/// A base URL every test can share.
pub fn test_url() -> Url {
    Url::parse("http://server.test/socket.io/").unwrap()
}

/// Poll `condition` until it holds or the deadline passes.
pub async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for: {description}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
