//! WebSocket transport using `tokio-tungstenite`.
//!
//! The server speaks first on WebSocket sessions (it sends Open
//! spontaneously after the dial), so `request_handshake` is a no-op and
//! `apply_handshake` only records the session id.
//!
//! The concrete connector sits behind the [`WsConnection`] trait so tests
//! can script frames; [`TungsteniteConnection`] is the default backend.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::engine::handshake::Handshake;
use crate::engine::transport::{
    Lifecycle, LifecycleState, StopSignal, Transport, TransportContext, TransportKind,
};
use crate::error::{Result, SocketError};

/// Type alias for the underlying WebSocket stream.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ── Connector seam ──────────────────────────────────────────────────

/// A dialed WebSocket connection carrying one engine.io frame per text
/// frame.
///
/// # Cancel safety
///
/// [`receive`](WsConnection::receive) is awaited inside `tokio::select!`
/// and **MUST** be cancel-safe: dropping the future before completion
/// must not lose a frame.
#[async_trait]
pub trait WsConnection: Send + Sync {
    /// Establish the connection.
    async fn dial(&self, url: &Url, cancel: &CancellationToken) -> Result<()>;

    /// Send one frame.
    async fn send(&self, data: Vec<u8>) -> Result<()>;

    /// Receive the next frame. `Ok(None)` means the peer closed cleanly.
    async fn receive(&self) -> Result<Option<Vec<u8>>>;

    /// Close the connection. Must tolerate being called when not dialed.
    async fn close(&self) -> Result<()>;
}

/// A [`tokio_tungstenite`]-backed implementation of [`WsConnection`].
///
/// The stream is split so sends and receives never contend on one lock.
#[derive(Default)]
pub struct TungsteniteConnection {
    sink: tokio::sync::Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: tokio::sync::Mutex<Option<SplitStream<WsStream>>>,
}

impl TungsteniteConnection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WsConnection for TungsteniteConnection {
    async fn dial(&self, url: &Url, cancel: &CancellationToken) -> Result<()> {
        tracing::debug!(url = %url, "dialing WebSocket server");
        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (stream, _response) = tokio::select! {
            result = connect => {
                result.map_err(|e| SocketError::TransportDial(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(SocketError::Cancelled),
        };
        tracing::debug!(url = %url, "WebSocket connection established");

        let (sink, stream) = stream.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn send(&self, data: Vec<u8>) -> Result<()> {
        let text = String::from_utf8(data)
            .map_err(|e| SocketError::TransportIo(format!("non-UTF-8 outbound frame: {e}")))?;
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| SocketError::TransportIo("websocket not connected".into()))?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| SocketError::TransportIo(e.to_string()))
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        loop {
            let mut guard = self.stream.lock().await;
            let stream = guard
                .as_mut()
                .ok_or_else(|| SocketError::TransportIo("websocket not connected".into()))?;
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(SocketError::TransportIo(e.to_string())),
                None => return Ok(None),
            };
            match message {
                Message::Text(text) => return Ok(Some(text.into_bytes())),
                Message::Binary(bytes) => return Ok(Some(bytes)),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return Ok(None);
                }
                // tungstenite answers pings itself; pongs carry nothing
                // we need.
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            sink.close()
                .await
                .map_err(|e| SocketError::TransportIo(e.to_string()))?;
        }
        Ok(())
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Session {
    inbound: mpsc::Sender<Vec<u8>>,
    on_close: mpsc::Sender<Option<SocketError>>,
    cancel: CancellationToken,
}

/// WebSocket [`Transport`].
pub struct WebSocketTransport {
    ws: Arc<dyn WsConnection>,
    lifecycle: Arc<LifecycleState>,
    stop: Mutex<Option<StopSignal>>,
}

impl WebSocketTransport {
    /// Create a WebSocket transport over the default tungstenite
    /// connector.
    pub fn new() -> Self {
        Self::with_connection(Arc::new(TungsteniteConnection::new()))
    }

    /// Create a WebSocket transport over a custom [`WsConnection`].
    pub fn with_connection(ws: Arc<dyn WsConnection>) -> Self {
        Self {
            ws,
            lifecycle: Arc::new(LifecycleState::new()),
            stop: Mutex::new(None),
        }
    }

    async fn read_loop(
        ws: Arc<dyn WsConnection>,
        session: Session,
        lifecycle: Arc<LifecycleState>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        tracing::debug!("websocket read loop started");
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    tracing::debug!("stop websocket read loop");
                    let _ = session.on_close.send(None).await;
                    break;
                }
                _ = session.cancel.cancelled() => {
                    tracing::debug!("cancelled, stop websocket read loop");
                    let _ = session.on_close.send(Some(SocketError::Cancelled)).await;
                    break;
                }
                received = ws.receive() => {
                    match received {
                        Ok(Some(bytes)) => {
                            if session.inbound.send(bytes).await.is_err() {
                                tracing::debug!("inbound channel closed, stop websocket read loop");
                                let _ = session.on_close.send(None).await;
                                break;
                            }
                        }
                        Ok(None) => {
                            tracing::debug!("websocket closed by server");
                            let _ = session.on_close.send(None).await;
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "websocket receive error");
                            let _ = session.on_close.send(Some(e)).await;
                            break;
                        }
                    }
                }
            }
        }
        lifecycle.set(Lifecycle::Stopped);
        // Close-side errors are logged, never propagated.
        if let Err(e) = ws.close().await {
            tracing::debug!(error = %e, "websocket close error");
        }
        tracing::debug!("websocket read loop exited");
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn start(&self, ctx: TransportContext) -> Result<()> {
        let url = build_url(&ctx.url, &ctx.sid)?;
        self.ws.dial(&url, &ctx.cancel).await?;

        let session = Session {
            inbound: ctx.inbound,
            on_close: ctx.on_close,
            cancel: ctx.cancel,
        };

        let (stop, stop_rx) = StopSignal::new();
        *self.stop.lock().expect("websocket stop lock poisoned") = Some(stop);
        self.lifecycle.set(Lifecycle::Running);

        tokio::spawn(Self::read_loop(
            Arc::clone(&self.ws),
            session,
            Arc::clone(&self.lifecycle),
            stop_rx,
        ));
        Ok(())
    }

    async fn request_handshake(&self) -> Result<()> {
        // The server sends Open spontaneously after the dial.
        Ok(())
    }

    fn apply_handshake(&self, _handshake: &Handshake) {
        // The sid is bound into the URL at dial time; an already-running
        // websocket session has nothing to adopt.
    }

    async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.ws.send(data).await
    }

    async fn stop(&self) -> Result<()> {
        if !self
            .lifecycle
            .transition(Lifecycle::Running, Lifecycle::Stopping)
        {
            return Ok(());
        }
        if let Some(stop) = self
            .stop
            .lock()
            .expect("websocket stop lock poisoned")
            .take()
        {
            stop.fire();
        }
        Ok(())
    }
}

/// Build the dial URL: scheme mapped `http→ws` / `https→wss`, query
/// overridden to `EIO=4&sid=<sid>&transport=websocket`.
fn build_url(base: &Url, sid: &str) -> Result<Url> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| SocketError::Config(format!("cannot map scheme {} to {scheme}", base.scheme())))?;
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("sid", sid)
        .append_pair("transport", "websocket");
    Ok(url)
}
