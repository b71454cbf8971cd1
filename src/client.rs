//! The socket.io client.
//!
//! [`Client`] multiplexes named event streams over one engine.io
//! session. It owns the namespace registry, the ack table, and the
//! connect bootstrap: when the engine reports its handshake, the client
//! sends a Connect packet for the default namespace, and the user-facing
//! `"connect"` event fires only once the server's Connect response
//! arrives.
//!
//! Handlers run on independent tasks so a slow or panicking handler can
//! never stall the dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::ack::{AckSlot, AckTable};
use crate::engine::transport::Transport;
use crate::engine::{EngineClient, EngineClientBuilder};
use crate::error::{Result, SocketError};
use crate::handler::{IntoEventHandler, RawHandler};
use crate::namespace::Namespace;
use crate::packet::{self, Event, Packet, PacketKind, DEFAULT_NAMESPACE};
use crate::payload::{Payload, PayloadParser, TolerantParser};
use crate::timer::{Timer, TokioTimer};

/// Event name fired when a namespace is acknowledged by the server.
pub const EVENT_CONNECT: &str = "connect";
/// Event name fired when the server disconnects a namespace.
pub const EVENT_DISCONNECT: &str = "disconnect";
/// Event name fired when the server refuses a namespace connect.
pub const EVENT_ERROR: &str = "error";

// ── Emit input shapes ───────────────────────────────────────────────

/// Conversion of the accepted `emit` call shapes into an [`Event`]:
/// an event name, a name plus positional payloads, or a pre-built
/// [`Event`] value.
///
/// Combining a pre-built [`Event`] with positional payloads fails with
/// [`SocketError::MixedEventForm`].
pub trait TryIntoEvent {
    fn try_into_event(self) -> Result<Event>;
}

impl TryIntoEvent for Event {
    fn try_into_event(self) -> Result<Event> {
        Ok(self)
    }
}

impl TryIntoEvent for &str {
    fn try_into_event(self) -> Result<Event> {
        Ok(Event::new(self))
    }
}

impl TryIntoEvent for String {
    fn try_into_event(self) -> Result<Event> {
        Ok(Event::new(self))
    }
}

macro_rules! impl_tuple_into_event {
    ($(($($arg:ident),+)),+ $(,)?) => {
        $(
            #[allow(non_snake_case)]
            impl<$($arg: Serialize),+> TryIntoEvent for (&str, $($arg),+) {
                fn try_into_event(self) -> Result<Event> {
                    let (name, $($arg),+) = self;
                    let mut event = Event::new(name);
                    $(event.payloads.push(Payload::new(&$arg)?);)+
                    Ok(event)
                }
            }

            impl<$($arg: Serialize),+> TryIntoEvent for (Event, $($arg),+) {
                fn try_into_event(self) -> Result<Event> {
                    Err(SocketError::MixedEventForm)
                }
            }
        )+
    };
}

impl_tuple_into_event!(
    (A0),
    (A0, A1),
    (A0, A1, A2),
    (A0, A1, A2, A3),
    (A0, A1, A2, A3, A4),
    (A0, A1, A2, A3, A4, A5),
    (A0, A1, A2, A3, A4, A5, A6),
    (A0, A1, A2, A3, A4, A5, A6, A7),
);

// ── Emit options ────────────────────────────────────────────────────

type TimeoutHandler = Box<dyn FnOnce() + Send>;

/// Acknowledgement options for one emit. Repeated calls replace the
/// previous setting.
#[derive(Default)]
pub struct EmitOptions {
    ack: Option<RawHandler>,
    timeout: Option<(Duration, TimeoutHandler)>,
}

impl EmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `handler` with the server's ack payloads.
    #[must_use]
    pub fn with_ack<M>(mut self, handler: impl IntoEventHandler<M>) -> Self {
        self.ack = Some(handler.into_event_handler());
        self
    }

    /// Give up after `timeout` and invoke `on_timeout` instead of the
    /// ack handler. The timeout affects only this emit, never the
    /// session.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration, on_timeout: impl FnOnce() + Send + 'static) -> Self {
        self.timeout = Some((timeout, Box::new(on_timeout)));
        self
    }

    fn is_plain(&self) -> bool {
        self.ack.is_none() && self.timeout.is_none()
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// socket.io client handle. Cheap to clone; all clones share one
/// session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    engine: EngineClient,
    payload_parser: Arc<dyn PayloadParser>,
    timer: Arc<dyn Timer>,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
    default_namespace: String,
    acks: AckTable,
    handshake_data: Mutex<Option<Value>>,
    cancel: Mutex<CancellationToken>,
}

impl Client {
    /// Start building a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Open the session. Returns once the underlying transport is up;
    /// the namespace handshake completes asynchronously and fires the
    /// `"connect"` event.
    ///
    /// # Errors
    ///
    /// Returns the first transport setup error.
    pub async fn connect(&self, cancel: CancellationToken) -> Result<()> {
        *self.inner.cancel.lock().expect("cancel lock poisoned") = cancel.clone();
        self.inner.engine.connect(cancel).await
    }

    /// Register a handler for `event` on the default namespace.
    ///
    /// The handler is either a raw `Fn(Vec<Payload>)` or a typed closure
    /// whose parameters are decoded from the payloads; see
    /// [`IntoEventHandler`].
    pub fn on<M>(&self, event: impl Into<String>, handler: impl IntoEventHandler<M>) {
        self.inner
            .namespace(&self.inner.default_namespace)
            .on(event, handler.into_event_handler());
    }

    /// Register a handler for `event` on `namespace`, creating the
    /// namespace on first reference.
    pub fn on_ns<M>(
        &self,
        namespace: &str,
        event: impl Into<String>,
        handler: impl IntoEventHandler<M>,
    ) {
        self.inner
            .namespace(namespace)
            .on(event, handler.into_event_handler());
    }

    /// Register a wildcard handler on the default namespace; it receives
    /// the event name prepended to the payloads.
    pub fn on_any<M>(&self, handler: impl IntoEventHandler<M>) {
        self.inner
            .namespace(&self.inner.default_namespace)
            .on_any(handler.into_event_handler());
    }

    /// Register a wildcard handler on `namespace`.
    pub fn on_any_ns<M>(&self, namespace: &str, handler: impl IntoEventHandler<M>) {
        self.inner
            .namespace(namespace)
            .on_any(handler.into_event_handler());
    }

    /// Emit an event on the default namespace.
    ///
    /// # Errors
    ///
    /// Serialization and form errors are returned synchronously; see
    /// [`TryIntoEvent`].
    pub async fn emit(&self, event: impl TryIntoEvent) -> Result<()> {
        self.emit_ns(&self.inner.default_namespace, event, EmitOptions::new())
            .await
    }

    /// Emit an event on the default namespace with ack options.
    pub async fn emit_with(&self, event: impl TryIntoEvent, options: EmitOptions) -> Result<()> {
        self.emit_ns(&self.inner.default_namespace, event, options).await
    }

    /// Emit an event on `namespace` with ack options.
    pub async fn emit_ns(
        &self,
        namespace: &str,
        event: impl TryIntoEvent,
        options: EmitOptions,
    ) -> Result<()> {
        let event = event.try_into_event()?;
        ClientInner::emit_event(&self.inner, namespace, event, options).await
    }

    /// Set the auth blob carried by the Connect packet. May also be
    /// configured at build time via
    /// [`ClientBuilder::with_handshake_data`].
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Serialization`] if the value cannot be
    /// represented as JSON.
    pub fn set_handshake_data<T: Serialize>(&self, data: T) -> Result<()> {
        *self
            .inner
            .handshake_data
            .lock()
            .expect("handshake data lock poisoned") = Some(serde_json::to_value(data)?);
        Ok(())
    }

    /// Whether the server has acknowledged `namespace`.
    pub fn is_connected(&self, namespace: &str) -> bool {
        self.inner
            .namespaces
            .read()
            .expect("namespace lock poisoned")
            .get(namespace)
            .is_some_and(|ns| ns.is_connected())
    }

    /// Number of emits still waiting for an acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.inner.acks.pending()
    }

    /// The underlying engine.io client, e.g. to hook its close signal
    /// for an external reconnection policy.
    pub fn engine(&self) -> &EngineClient {
        &self.inner.engine
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.inner.engine.close().await
    }
}

impl ClientInner {
    /// Get or lazily create a namespace.
    fn namespace(&self, name: &str) -> Arc<Namespace> {
        if let Some(ns) = self
            .namespaces
            .read()
            .expect("namespace lock poisoned")
            .get(name)
        {
            return Arc::clone(ns);
        }
        let mut map = self.namespaces.write().expect("namespace lock poisoned");
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Namespace::new(name))),
        )
    }

    /// The engine finished its handshake: send the namespace Connect
    /// packet with the configured auth blob.
    fn spawn_connect_bootstrap(inner: Arc<Self>) {
        tokio::spawn(async move {
            let auth = inner
                .handshake_data
                .lock()
                .expect("handshake data lock poisoned")
                .clone();
            let packet = Packet::connect(inner.default_namespace.clone(), auth);
            if let Err(e) = inner.send_packet(&packet).await {
                tracing::error!(error = %e, "can't connect namespace");
            }
        });
    }

    async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let wire = packet::serialize(packet)?;
        tracing::debug!(packet = %String::from_utf8_lossy(&wire), "socket.io send");
        self.engine.send(wire).await
    }

    async fn emit_event(
        inner: &Arc<Self>,
        namespace: &str,
        event: Event,
        options: EmitOptions,
    ) -> Result<()> {
        if options.is_plain() {
            return inner.send_packet(&Packet::event(namespace, event)).await;
        }

        let EmitOptions { ack, timeout } = options;
        let mut packet = Packet::event(namespace, event);

        match timeout {
            None => {
                // Ack without timeout: the dispatcher invokes the
                // handler straight from the table.
                let handler = ack.ok_or(SocketError::BadCallback)?;
                packet.ack_id = Some(inner.acks.register(AckSlot::Handler(handler)));
            }
            Some((duration, on_timeout)) => {
                let (ack_tx, ack_rx) = oneshot::channel();
                let id = inner.acks.register(AckSlot::Waiter(ack_tx));
                packet.ack_id = Some(id);
                Self::spawn_ack_timeout(inner, id, duration, on_timeout, ack, ack_rx);
            }
        }

        inner.send_packet(&packet).await
    }

    /// Dedicated task for one ack-with-timeout: first of {ack arrival,
    /// timer fire, client cancellation} wins, and the table entry is
    /// removed exactly once.
    fn spawn_ack_timeout(
        inner: &Arc<Self>,
        id: u64,
        duration: Duration,
        on_timeout: TimeoutHandler,
        ack: Option<RawHandler>,
        ack_rx: oneshot::Receiver<Vec<Payload>>,
    ) {
        let inner = Arc::clone(inner);
        let timer = Arc::clone(&inner.timer);
        let cancel = inner.cancel.lock().expect("cancel lock poisoned").clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.after(duration) => {
                    tracing::warn!(id, ?duration, "ack timeout");
                    inner.acks.take(id);
                    on_timeout();
                }
                _ = cancel.cancelled() => {
                    tracing::warn!(id, "cancelled while waiting for ack");
                    inner.acks.take(id);
                }
                payloads = ack_rx => {
                    match payloads {
                        Ok(payloads) => {
                            if let Some(handler) = ack {
                                handler(payloads);
                            }
                        }
                        Err(_) => tracing::debug!(id, "ack waiter channel closed"),
                    }
                }
            }
        });
    }

    /// Inbound byte-message from the engine: decode and dispatch.
    fn handle_message(&self, data: &[u8]) {
        tracing::debug!(packet = %String::from_utf8_lossy(data), "socket.io receive");
        let packet = match packet::parse(data, self.payload_parser.as_ref()) {
            Ok(packet) => packet,
            Err(SocketError::Unsupported(feature)) => {
                tracing::warn!(%feature, "unsupported packet dropped");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "can't parse message");
                return;
            }
        };
        self.dispatch(packet);
    }

    fn dispatch(&self, packet: Packet) {
        let ns = self.namespace(&packet.namespace);
        match packet.kind {
            PacketKind::Connect => {
                tracing::info!(namespace = %ns.name(), "connected to namespace");
                ns.mark_connected();
                self.invoke_handlers(&ns, EVENT_CONNECT, optional_payload(packet.payload));
            }
            PacketKind::Disconnect => {
                tracing::info!(namespace = %ns.name(), "disconnected from namespace");
                self.invoke_handlers(&ns, EVENT_DISCONNECT, optional_payload(packet.payload));
            }
            PacketKind::Event => {
                if let Some(event) = packet.event {
                    self.dispatch_event(&ns, event);
                }
            }
            PacketKind::Ack => self.handle_ack(packet),
            PacketKind::ConnectError => {
                // One normalized shape: the body as JSON when it parses,
                // the raw text as a JSON string otherwise.
                let payload = packet
                    .payload
                    .unwrap_or_else(|| Value::String(packet.error_message.unwrap_or_default()));
                tracing::error!(error = %payload, namespace = %ns.name(), "connect error");
                match Payload::new(&payload) {
                    Ok(payload) => self.invoke_handlers(&ns, EVENT_ERROR, vec![payload]),
                    Err(e) => tracing::error!(error = %e, "can't wrap connect error payload"),
                }
            }
            PacketKind::BinaryEvent | PacketKind::BinaryAck => {
                // The parser rejects these before dispatch.
                tracing::warn!("unsupported binary packet dropped");
            }
        }
    }

    fn dispatch_event(&self, ns: &Namespace, event: Event) {
        let named = ns.handlers_for(&event.name);
        let wildcards = ns.any_handlers();
        if named.is_empty() && wildcards.is_empty() {
            tracing::info!(event = %event.name, "no handlers for event");
            return;
        }

        if !wildcards.is_empty() {
            match Payload::new(&event.name) {
                Ok(name_payload) => {
                    let mut with_name = Vec::with_capacity(event.payloads.len() + 1);
                    with_name.push(name_payload);
                    with_name.extend(event.payloads.iter().cloned());
                    for handler in wildcards {
                        Self::spawn_handler(handler, with_name.clone());
                    }
                }
                Err(e) => tracing::error!(error = %e, "can't wrap event name for wildcard handlers"),
            }
        }

        for handler in named {
            Self::spawn_handler(handler, event.payloads.clone());
        }
    }

    fn handle_ack(&self, packet: Packet) {
        let Some(ack_id) = packet.ack_id else {
            tracing::warn!("ack packet without an ack id dropped");
            return;
        };
        let payloads = packet.event.map(|event| event.payloads).unwrap_or_default();
        match self.acks.take(ack_id) {
            Some(AckSlot::Handler(handler)) => Self::spawn_handler(handler, payloads),
            Some(AckSlot::Waiter(tx)) => {
                if tx.send(payloads).is_err() {
                    tracing::debug!(id = ack_id, "ack waiter already gone");
                }
            }
            None => tracing::info!(id = ack_id, "no ack callback for id"),
        }
    }

    /// Handlers run on their own tasks: a slow or panicking handler
    /// cannot stall the dispatcher.
    fn spawn_handler(handler: RawHandler, payloads: Vec<Payload>) {
        tokio::spawn(async move {
            handler(payloads);
        });
    }

    fn invoke_handlers(&self, ns: &Namespace, event: &str, payloads: Vec<Payload>) {
        let handlers = ns.handlers_for(event);
        if handlers.is_empty() {
            tracing::debug!(event, namespace = %ns.name(), "no handlers for event");
            return;
        }
        for handler in handlers {
            Self::spawn_handler(handler, payloads.clone());
        }
    }
}

/// A lifecycle packet's body as a payload list.
fn optional_payload(payload: Option<Value>) -> Vec<Payload> {
    payload
        .and_then(|value| Payload::new(&value).ok())
        .into_iter()
        .collect()
}

// ── Builder ─────────────────────────────────────────────────────────

/// Builder for [`Client`]. All validation happens in
/// [`build`](ClientBuilder::build).
///
/// Exactly one of a server URL and a pre-built [`EngineClient`] must be
/// supplied. Transport-level options are forwarded to the engine builder
/// and only apply when the engine is built here.
pub struct ClientBuilder {
    url: Option<Url>,
    raw_url: Option<String>,
    engine: Option<EngineClient>,
    engine_builder: EngineClientBuilder,
    default_namespace: String,
    payload_parser: Option<Arc<dyn PayloadParser>>,
    timer: Option<Arc<dyn Timer>>,
    handshake_data: Option<Value>,
    deferred_error: Option<SocketError>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            raw_url: None,
            engine: None,
            engine_builder: EngineClientBuilder::new(),
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            payload_parser: None,
            timer: None,
            handshake_data: None,
            deferred_error: None,
        }
    }

    /// Server base URL. A bare root path defaults to `/socket.io/`.
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Server base URL as a string; parsed and validated at build time.
    #[must_use]
    pub fn with_raw_url(mut self, url: impl Into<String>) -> Self {
        self.raw_url = Some(url.into());
        self
    }

    /// Use a pre-built engine.io client instead of a URL.
    #[must_use]
    pub fn with_engine_client(mut self, engine: EngineClient) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Namespace used by `on`, `emit`, and the connect bootstrap.
    /// Defaults to `"/"`.
    #[must_use]
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Replace the payload parser. Defaults to
    /// [`TolerantParser`](crate::payload::TolerantParser).
    #[must_use]
    pub fn with_payload_parser(mut self, parser: impl PayloadParser + 'static) -> Self {
        self.payload_parser = Some(Arc::new(parser));
        self
    }

    /// Replace the timer source used by ack timeouts.
    #[must_use]
    pub fn with_timer(mut self, timer: impl Timer + 'static) -> Self {
        self.timer = Some(Arc::new(timer));
        self
    }

    /// Auth blob carried by the Connect packet.
    #[must_use]
    pub fn with_handshake_data<T: Serialize>(mut self, data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.handshake_data = Some(value),
            Err(e) => self.deferred_error = Some(SocketError::Serialization(e)),
        }
        self
    }

    /// Forwarded to the engine builder: the transport to open with.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.engine_builder = self.engine_builder.with_transport(transport);
        self
    }

    /// Forwarded to the engine builder: the upgradable transport set.
    #[must_use]
    pub fn with_supported_transports(mut self, transports: Vec<Arc<dyn Transport>>) -> Self {
        self.engine_builder = self.engine_builder.with_supported_transports(transports);
        self
    }

    /// Forwarded to the engine builder: HTTP client for the default
    /// polling transport.
    #[cfg(feature = "transport-polling")]
    #[must_use]
    pub fn with_http_client(
        mut self,
        http_client: Arc<dyn crate::engine::transports::HttpClient>,
    ) -> Self {
        self.engine_builder = self.engine_builder.with_http_client(http_client);
        self
    }

    /// Forwarded to the engine builder: connector for the default
    /// WebSocket transport.
    #[cfg(feature = "transport-websocket")]
    #[must_use]
    pub fn with_ws_connection(
        mut self,
        ws: Arc<dyn crate::engine::transports::WsConnection>,
    ) -> Self {
        self.engine_builder = self.engine_builder.with_ws_connection(ws);
        self
    }

    /// Forwarded to the engine builder; carried for an external
    /// reconnection policy, not consumed by the core.
    #[must_use]
    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.engine_builder = self.engine_builder.with_reconnect_attempts(attempts);
        self
    }

    /// Forwarded to the engine builder; carried for an external
    /// reconnection policy, not consumed by the core.
    #[must_use]
    pub fn with_reconnect_wait(mut self, wait: Duration) -> Self {
        self.engine_builder = self.engine_builder.with_reconnect_wait(wait);
        self
    }

    /// Validate the configuration and assemble the client.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Config`] when neither or both of a URL and
    /// a pre-built engine client are supplied, or when the engine
    /// configuration is invalid.
    pub fn build(self) -> Result<Client> {
        if let Some(error) = self.deferred_error {
            return Err(error);
        }

        let url = match (self.url, self.raw_url) {
            (Some(_), Some(_)) => {
                return Err(SocketError::Config(
                    "supply either with_url or with_raw_url, not both".into(),
                ))
            }
            (Some(url), None) => Some(url),
            (None, Some(raw)) => Some(
                Url::parse(&raw)
                    .map_err(|e| SocketError::Config(format!("invalid URL {raw:?}: {e}")))?,
            ),
            (None, None) => None,
        };

        let engine = match (self.engine, url) {
            (Some(_), Some(_)) => {
                return Err(SocketError::Config(
                    "either a URL or a pre-built engine client must be provided, not both".into(),
                ))
            }
            (None, None) => {
                return Err(SocketError::Config(
                    "either a URL or a pre-built engine client must be provided".into(),
                ))
            }
            (Some(engine), None) => engine,
            (None, Some(url)) => self.engine_builder.with_url(default_path(url)).build()?,
        };

        let inner = Arc::new(ClientInner {
            engine,
            payload_parser: self
                .payload_parser
                .unwrap_or_else(|| Arc::new(TolerantParser)),
            timer: self.timer.unwrap_or_else(|| Arc::new(TokioTimer)),
            namespaces: RwLock::new(HashMap::new()),
            default_namespace: self.default_namespace,
            acks: AckTable::new(),
            handshake_data: Mutex::new(self.handshake_data),
            cancel: Mutex::new(CancellationToken::new()),
        });

        // Create the default namespace eagerly; everything else is lazy.
        inner.namespace(&inner.default_namespace);

        // The engine callbacks hold weak handles: the engine must not
        // keep the client alive.
        let weak: Weak<ClientInner> = Arc::downgrade(&inner);
        inner.engine.on_connect(move || {
            if let Some(inner) = weak.upgrade() {
                ClientInner::spawn_connect_bootstrap(inner);
            }
        });
        let weak: Weak<ClientInner> = Arc::downgrade(&inner);
        inner.engine.on_message(move |bytes| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(&bytes);
            }
        });

        Ok(Client { inner })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Default the URL path to `/socket.io/` when the caller left it bare.
fn default_path(mut url: Url) -> Url {
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url
}
