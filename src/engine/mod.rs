//! engine.io v4 client layer.
//!
//! [`EngineClient`] owns the active [`Transport`], drives the handshake,
//! performs the probe-based transport upgrade, auto-answers pings, and
//! routes inbound Message frames to the layer above. It is created once
//! and outlives individual transports: on upgrade the previous transport
//! is stopped and the inbound sink plus close signal move to the new one.
//!
//! Two one-shot latches gate user sends: the *handshake latch* (released
//! once the server's first Open frame has been processed) and the
//! *upgrade latch* (armed while a transport swap is in flight, released
//! when the probe exchange completes). [`EngineClient::send`] waits on
//! both before handing bytes to the active transport.

pub mod frame;
pub mod handshake;
pub mod transport;
pub mod transports;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SocketError};
use crate::latch::Latch;

pub use frame::{Frame, FrameKind};
pub use handshake::Handshake;
pub use transport::{Transport, TransportContext, TransportKind};

/// Capacity of the bounded inbound channel (transport → dispatcher).
const INBOUND_CHANNEL_CAPACITY: usize = 100;

type MessageHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
type HookHandler = Arc<dyn Fn() + Send + Sync>;

/// engine.io client handle. Cheap to clone; all clones drive the same
/// session.
#[derive(Clone)]
pub struct EngineClient {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    url: Url,
    supported: HashMap<TransportKind, Arc<dyn Transport>>,
    active: RwLock<Arc<dyn Transport>>,
    sid: Mutex<String>,
    ping_timeout: Mutex<Option<Duration>>,
    /// Released once the first Open frame of a session is processed.
    handshake_latch: Mutex<Arc<Latch>>,
    /// Armed while a transport swap is in flight.
    upgrade_latch: Mutex<Arc<Latch>>,
    /// Sink handed to transports; dropped on close to end the dispatcher.
    inbound_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    /// Close signal of the currently running transport session.
    close_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Option<SocketError>>>>,
    on_message: Mutex<Option<MessageHandler>>,
    on_connect: Mutex<Option<HookHandler>>,
    on_close: Mutex<Option<HookHandler>>,
    cancel: Mutex<CancellationToken>,
    /// Carried for an out-of-core reconnection policy; not consumed here.
    #[allow(dead_code)]
    reconnect_attempts: u32,
    #[allow(dead_code)]
    reconnect_wait: Duration,
}

impl EngineClient {
    /// Start building an engine.io client.
    pub fn builder() -> EngineClientBuilder {
        EngineClientBuilder::new()
    }

    /// Open the session: spawn the dispatcher, start the primary
    /// transport, and request the handshake.
    ///
    /// Returns once the transport is up; the handshake itself completes
    /// asynchronously and releases the handshake latch.
    ///
    /// # Errors
    ///
    /// The first transport setup failure is returned directly
    /// (typically [`SocketError::TransportDial`]).
    pub async fn connect(&self, cancel: CancellationToken) -> Result<()> {
        let inner = &self.inner;
        *inner.cancel.lock().expect("cancel lock poisoned") = cancel.clone();

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        *inner.inbound_tx.lock().expect("inbound lock poisoned") = Some(inbound_tx.clone());

        *inner.handshake_latch.lock().expect("latch lock poisoned") = Arc::new(Latch::armed());
        *inner.upgrade_latch.lock().expect("latch lock poisoned") = Arc::new(Latch::released());

        tokio::spawn(EngineInner::message_loop(
            Arc::clone(inner),
            inbound_rx,
            cancel.clone(),
        ));

        let (close_tx, close_rx) = mpsc::channel(1);
        *inner.close_rx.lock().await = Some(close_rx);

        let active = inner.active_transport();
        let ctx = TransportContext {
            url: inner.url.clone(),
            sid: inner.sid.lock().expect("sid lock poisoned").clone(),
            inbound: inbound_tx,
            on_close: close_tx,
            cancel,
        };
        active.start(ctx).await?;
        active.request_handshake().await?;
        Ok(())
    }

    /// Send one upper-layer byte-message.
    ///
    /// Blocks until the handshake latch and the upgrade latch are both
    /// released, so no user data can reach the wire before the session
    /// is established or while a transport swap is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Cancelled`] if the client is cancelled
    /// while waiting.
    pub async fn send(&self, message: Vec<u8>) -> Result<()> {
        let handshake = Arc::clone(&self.inner.handshake_latch.lock().expect("latch lock poisoned"));
        let upgrade = Arc::clone(&self.inner.upgrade_latch.lock().expect("latch lock poisoned"));
        let cancel = self.inner.cancel.lock().expect("cancel lock poisoned").clone();

        tokio::select! {
            _ = async {
                handshake.wait().await;
                upgrade.wait().await;
            } => {}
            _ = cancel.cancelled() => return Err(SocketError::Cancelled),
        }

        self.inner.send_frame(Frame::message(message)).await
    }

    /// Register the handler for inbound upper-layer byte-messages.
    pub fn on_message(&self, handler: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        *self.inner.on_message.lock().expect("handler lock poisoned") = Some(Arc::new(handler));
    }

    /// Register the hook fired when a session's first Open frame has
    /// been processed. Repeated Opens update the session state without
    /// re-firing the hook.
    pub fn on_connect(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_connect.lock().expect("handler lock poisoned") = Some(Arc::new(handler));
    }

    /// Register the hook fired when the server sends a Close frame.
    ///
    /// A reconnection policy can be layered on top of this hook; the
    /// core itself never reconnects.
    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_close.lock().expect("handler lock poisoned") = Some(Arc::new(handler));
    }

    /// The session id negotiated with the server, if any yet.
    pub fn sid(&self) -> String {
        self.inner.sid.lock().expect("sid lock poisoned").clone()
    }

    /// The server-advised heartbeat timeout, if any yet.
    pub fn ping_timeout(&self) -> Option<Duration> {
        *self.inner.ping_timeout.lock().expect("ping timeout lock poisoned")
    }

    /// Stop the active transport, drain its close signal, and shut down
    /// the dispatcher. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        inner.active_transport().stop().await?;
        if let Some(mut close_rx) = inner.close_rx.lock().await.take() {
            let _ = close_rx.recv().await;
        }
        // Dropping the sink closes the inbound channel; the dispatcher
        // drains what is buffered and exits.
        *inner.inbound_tx.lock().expect("inbound lock poisoned") = None;
        Ok(())
    }
}

impl EngineInner {
    fn active_transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.active.read().expect("active transport lock poisoned"))
    }

    /// Dispatcher: the only consumer of the inbound channel.
    async fn message_loop(
        inner: Arc<EngineInner>,
        mut inbound_rx: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) {
        tracing::debug!("engine.io dispatcher started");
        loop {
            tokio::select! {
                message = inbound_rx.recv() => {
                    match message {
                        Some(bytes) => {
                            if let Err(e) = inner.handle_packet(bytes).await {
                                tracing::error!(error = %e, "handle packet error");
                            }
                        }
                        None => {
                            tracing::debug!("inbound channel closed, engine.io dispatcher exiting");
                            return;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::warn!("cancelled, engine.io client stopped processing messages");
                    return;
                }
            }
        }
    }

    async fn handle_packet(&self, data: Vec<u8>) -> Result<()> {
        tracing::debug!(packet = %String::from_utf8_lossy(&data), "handle engine.io packet");
        let frame = frame::decode(&data)?;

        match frame.kind {
            FrameKind::Open => self.handle_handshake(&frame.data).await?,
            FrameKind::Close => {
                let hook = self.on_close.lock().expect("handler lock poisoned").clone();
                if let Some(hook) = hook {
                    hook();
                }
            }
            FrameKind::Ping => {
                // Auto-answer with the same payload.
                self.send_frame(Frame::new(FrameKind::Pong, frame.data)).await?;
            }
            FrameKind::Pong => {
                if frame.data == b"probe" {
                    self.finish_upgrade().await;
                }
            }
            FrameKind::Message => {
                let handler = self.on_message.lock().expect("handler lock poisoned").clone();
                if let Some(handler) = handler {
                    handler(frame.data);
                }
            }
            FrameKind::Upgrade | FrameKind::Noop => {}
        }
        Ok(())
    }

    /// Apply an Open frame: adopt the handshake, release the handshake
    /// latch, fire the connect hook on the first Open, then upgrade if
    /// the server offers a supported transport we are not already on.
    ///
    /// Opens after the first are tolerated: the sid is updated again,
    /// the latch release is a no-op, and the connect hook stays quiet.
    async fn handle_handshake(&self, data: &[u8]) -> Result<()> {
        tracing::debug!(handshake = %String::from_utf8_lossy(data), "apply handshake");
        let handshake = Handshake::parse(data)?;

        for transport in self.supported.values() {
            transport.apply_handshake(&handshake);
        }

        *self.sid.lock().expect("sid lock poisoned") = handshake.sid.clone();
        if let Some(ms) = handshake.ping_timeout.filter(|ms| *ms > 0) {
            *self.ping_timeout.lock().expect("ping timeout lock poisoned") =
                Some(Duration::from_millis(ms));
        }

        let first_open = self
            .handshake_latch
            .lock()
            .expect("latch lock poisoned")
            .release();

        // Repeated Opens refresh the sid but must not re-run the connect
        // hook: the layer above sends one Connect frame per session.
        if first_open {
            let hook = self.on_connect.lock().expect("handler lock poisoned").clone();
            if let Some(hook) = hook {
                hook();
            }
        }

        let active_kind = self.active_transport().kind();
        for name in &handshake.upgrades {
            if name == active_kind.as_str() {
                break;
            }
            let candidate = TransportKind::from_name(name)
                .and_then(|kind| self.supported.get(&kind).cloned());
            match candidate {
                Some(transport) => return self.transport_upgrade(transport).await,
                None => tracing::warn!(upgrade = %name, "unsupported upgrade target"),
            }
        }
        Ok(())
    }

    /// Swap the active transport: stop the old one, wait for its close
    /// signal, start the new one on the inherited sink, and send the
    /// probe Ping.
    async fn transport_upgrade(&self, new_transport: Arc<dyn Transport>) -> Result<()> {
        tracing::debug!(to = %new_transport.kind(), "transport upgrade started");

        let upgrade_latch = Arc::new(Latch::armed());
        *self.upgrade_latch.lock().expect("latch lock poisoned") = Arc::clone(&upgrade_latch);

        let result = self.swap_transport(&new_transport).await;
        if let Err(e) = &result {
            // A failed swap must not leave senders parked forever.
            tracing::warn!(error = %e, "transport upgrade failed, releasing upgrade latch");
            upgrade_latch.release();
        }
        result
    }

    async fn swap_transport(&self, new_transport: &Arc<dyn Transport>) -> Result<()> {
        self.active_transport().stop().await?;
        if let Some(close_rx) = self.close_rx.lock().await.as_mut() {
            let _ = close_rx.recv().await;
        }

        *self.active.write().expect("active transport lock poisoned") =
            Arc::clone(new_transport);

        let (close_tx, close_rx) = mpsc::channel(1);
        *self.close_rx.lock().await = Some(close_rx);

        let inbound = self
            .inbound_tx
            .lock()
            .expect("inbound lock poisoned")
            .clone()
            .ok_or_else(|| SocketError::TransportIo("engine.io client is not connected".into()))?;

        let ctx = TransportContext {
            url: self.url.clone(),
            sid: self.sid.lock().expect("sid lock poisoned").clone(),
            inbound,
            on_close: close_tx,
            cancel: self.cancel.lock().expect("cancel lock poisoned").clone(),
        };
        new_transport.start(ctx).await?;

        self.send_frame(Frame::new(FrameKind::Ping, b"probe".to_vec()))
            .await
    }

    /// The server answered the probe: confirm with an Upgrade frame and
    /// release the upgrade latch.
    async fn finish_upgrade(&self) {
        let result = self.send_frame(Frame::empty(FrameKind::Upgrade)).await;
        self.upgrade_latch
            .lock()
            .expect("latch lock poisoned")
            .release();
        match result {
            Ok(()) => tracing::debug!("transport upgraded"),
            Err(e) => tracing::error!(error = %e, "send upgrade error"),
        }
    }

    /// Encode and send a frame on the active transport, bypassing the
    /// latches (protocol traffic must flow during handshake and upgrade).
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let wire = frame::encode(&frame)?;
        self.active_transport().send(wire).await
    }
}

// ── Builder ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum UrlInput {
    Parsed(Url),
    Raw(String),
}

/// Builder for [`EngineClient`]. All validation happens in
/// [`build`](EngineClientBuilder::build).
pub struct EngineClientBuilder {
    url: Option<UrlInput>,
    transport: Option<Arc<dyn Transport>>,
    supported: Option<Vec<Arc<dyn Transport>>>,
    #[cfg(feature = "transport-polling")]
    http_client: Option<Arc<dyn transports::HttpClient>>,
    #[cfg(feature = "transport-websocket")]
    ws_connection: Option<Arc<dyn transports::WsConnection>>,
    reconnect_attempts: u32,
    reconnect_wait: Duration,
}

impl EngineClientBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            transport: None,
            supported: None,
            #[cfg(feature = "transport-polling")]
            http_client: None,
            #[cfg(feature = "transport-websocket")]
            ws_connection: None,
            reconnect_attempts: 5,
            reconnect_wait: Duration::from_secs(5),
        }
    }

    /// Base server URL. Accepted schemes: `http`, `https`, `ws`, `wss`
    /// (the latter two are normalized to their HTTP counterparts).
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(UrlInput::Parsed(url));
        self
    }

    /// Base server URL as a string; parsed and validated at build time.
    #[must_use]
    pub fn with_raw_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(UrlInput::Raw(url.into()));
        self
    }

    /// The transport to open the session with. Defaults to polling when
    /// available, otherwise the first supported transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// The set of transports the engine may upgrade between. Repeated
    /// calls accumulate; explicitly supplying an empty set is a
    /// configuration error at build time.
    #[must_use]
    pub fn with_supported_transports(mut self, transports: Vec<Arc<dyn Transport>>) -> Self {
        self.supported.get_or_insert_with(Vec::new).extend(transports);
        self
    }

    /// Replace the HTTP client used by the default polling transport.
    #[cfg(feature = "transport-polling")]
    #[must_use]
    pub fn with_http_client(mut self, http_client: Arc<dyn transports::HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Replace the connector used by the default WebSocket transport.
    #[cfg(feature = "transport-websocket")]
    #[must_use]
    pub fn with_ws_connection(mut self, ws: Arc<dyn transports::WsConnection>) -> Self {
        self.ws_connection = Some(ws);
        self
    }

    /// Carried for an external reconnection policy; the core does not
    /// act on it.
    #[must_use]
    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Carried for an external reconnection policy; the core does not
    /// act on it.
    #[must_use]
    pub fn with_reconnect_wait(mut self, wait: Duration) -> Self {
        self.reconnect_wait = wait;
        self
    }

    /// Validate the configuration and assemble the client.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Config`] for a missing or unparsable URL,
    /// an unsupported scheme, or an empty effective transport set.
    pub fn build(self) -> Result<EngineClient> {
        let url = match self.url {
            Some(UrlInput::Parsed(url)) => url,
            Some(UrlInput::Raw(raw)) => Url::parse(&raw)
                .map_err(|e| SocketError::Config(format!("invalid URL {raw:?}: {e}")))?,
            None => return Err(SocketError::Config("URL is required".into())),
        };
        let url = normalize_url(url)?;

        let mut supported: HashMap<TransportKind, Arc<dyn Transport>> = HashMap::new();
        match self.supported {
            // An explicit empty set is a caller mistake, not a request
            // for the defaults.
            Some(list) if list.is_empty() => {
                return Err(SocketError::Config("no transports configured".into()));
            }
            Some(list) => {
                for transport in list {
                    supported.insert(transport.kind(), transport);
                }
            }
            None => {
                #[cfg(feature = "transport-polling")]
                {
                    let polling = match &self.http_client {
                        Some(http) => {
                            transports::PollingTransport::with_http_client(Arc::clone(http))
                        }
                        None => transports::PollingTransport::new(),
                    };
                    supported.insert(TransportKind::Polling, Arc::new(polling));
                }
                #[cfg(feature = "transport-websocket")]
                {
                    let websocket = match &self.ws_connection {
                        Some(ws) => transports::WebSocketTransport::with_connection(Arc::clone(ws)),
                        None => transports::WebSocketTransport::new(),
                    };
                    supported.insert(TransportKind::Websocket, Arc::new(websocket));
                }
            }
        }
        if let Some(transport) = &self.transport {
            supported
                .entry(transport.kind())
                .or_insert_with(|| Arc::clone(transport));
        }
        if supported.is_empty() {
            return Err(SocketError::Config("no transports configured".into()));
        }

        let active = match self.transport {
            Some(transport) => transport,
            None => supported
                .get(&TransportKind::Polling)
                .or_else(|| supported.get(&TransportKind::Websocket))
                .or_else(|| supported.values().next())
                .cloned()
                .expect("supported transport set verified non-empty"),
        };

        Ok(EngineClient {
            inner: Arc::new(EngineInner {
                url,
                supported,
                active: RwLock::new(active),
                sid: Mutex::new(String::new()),
                ping_timeout: Mutex::new(None),
                handshake_latch: Mutex::new(Arc::new(Latch::armed())),
                upgrade_latch: Mutex::new(Arc::new(Latch::released())),
                inbound_tx: Mutex::new(None),
                close_rx: tokio::sync::Mutex::new(None),
                on_message: Mutex::new(None),
                on_connect: Mutex::new(None),
                on_close: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                reconnect_attempts: self.reconnect_attempts,
                reconnect_wait: self.reconnect_wait,
            }),
        })
    }
}

impl Default for EngineClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize the base URL: map `ws`/`wss` to `http`/`https`, reject
/// other schemes, and force the `EIO=4` query parameter.
fn normalize_url(mut url: Url) -> Result<Url> {
    match url.scheme() {
        "http" | "https" => {}
        "ws" => url
            .set_scheme("http")
            .map_err(|()| SocketError::Config("cannot normalize ws scheme".into()))?,
        "wss" => url
            .set_scheme("https")
            .map_err(|()| SocketError::Config("cannot normalize wss scheme".into()))?,
        other => {
            return Err(SocketError::Config(format!("invalid URL scheme: {other}")));
        }
    }

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "EIO")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("EIO", "4");
    }
    Ok(url)
}
