//! HTTP long-polling transport.
//!
//! The run loop paces GET requests with a resettable ticker: the server's
//! handshake advises the cadence via `pingInterval`, and
//! [`apply_handshake`](crate::engine::transport::Transport::apply_handshake)
//! resets the ticker without restarting the loop. Outbound frames go out
//! as one POST each.
//!
//! The concrete HTTP stack sits behind the [`HttpClient`] trait so tests
//! can script responses; [`ReqwestHttpClient`] is the default backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::engine::handshake::Handshake;
use crate::engine::transport::{
    Lifecycle, LifecycleState, StopSignal, Transport, TransportContext, TransportKind,
};
use crate::error::{Result, SocketError};

/// Ticker period used until the server advises one.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

// ── HTTP client seam ────────────────────────────────────────────────

/// A minimal async HTTP client for the polling transport.
///
/// Implementations handle the mechanics of making requests (TLS,
/// connection pooling, redirects); the transport only needs a body per
/// GET and a fire-and-forget POST.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform one GET and return the raw response body.
    async fn get(&self, url: &Url) -> Result<Vec<u8>>;

    /// POST one encoded frame as the request body.
    async fn post(&self, url: &Url, body: Vec<u8>) -> Result<()>;
}

/// A [`reqwest`]-backed implementation of [`HttpClient`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SocketError::TransportIo(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SocketError::TransportIo(format!(
                "polling GET returned status {status}"
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| SocketError::TransportIo(e.to_string()))?;
        Ok(body.to_vec())
    }

    async fn post(&self, url: &Url, body: Vec<u8>) -> Result<()> {
        let response = self
            .inner
            .post(url.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| SocketError::TransportIo(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SocketError::TransportIo(format!(
                "polling POST returned status {status}"
            )));
        }
        tracing::debug!(status = %status, "polling POST accepted");
        Ok(())
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Per-session connection parameters, installed by `start`.
#[derive(Debug, Clone)]
struct Session {
    url: Url,
    sid: String,
    inbound: mpsc::Sender<Vec<u8>>,
    on_close: mpsc::Sender<Option<SocketError>>,
    cancel: CancellationToken,
}

/// HTTP long-polling [`Transport`].
pub struct PollingTransport {
    http: Arc<dyn HttpClient>,
    /// Ticker cadence; the run loop subscribes and rebuilds its interval
    /// on change. Dropping the transport closes the channel, which the
    /// run loop treats as fatal.
    period: watch::Sender<Duration>,
    session: Arc<Mutex<Option<Session>>>,
    lifecycle: Arc<LifecycleState>,
    stop: Mutex<Option<StopSignal>>,
}

impl PollingTransport {
    /// Create a polling transport over the default reqwest client.
    pub fn new() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }

    /// Create a polling transport over a custom [`HttpClient`].
    pub fn with_http_client(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            period: watch::channel(DEFAULT_PING_INTERVAL).0,
            session: Arc::new(Mutex::new(None)),
            lifecycle: Arc::new(LifecycleState::new()),
            stop: Mutex::new(None),
        }
    }

    fn locked_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().expect("polling session lock poisoned")
    }

    /// Perform one GET and push the body to the inbound sink.
    async fn poll_once(
        http: &dyn HttpClient,
        session: &Mutex<Option<Session>>,
    ) -> Result<()> {
        let (url, inbound) = {
            let guard = session.lock().expect("polling session lock poisoned");
            let session = guard
                .as_ref()
                .ok_or_else(|| SocketError::TransportIo("polling transport not started".into()))?;
            (build_url(&session.url, &session.sid), session.inbound.clone())
        };

        tracing::debug!(url = %url, "polling GET");
        let body = http.get(&url).await?;
        tracing::debug!(len = body.len(), "polling GET body received");

        // Bounded channel: a slow consumer backpressures the poller here.
        inbound
            .send(body)
            .await
            .map_err(|_| SocketError::TransportIo("inbound channel closed".into()))
    }

    async fn run_loop(
        http: Arc<dyn HttpClient>,
        session: Arc<Mutex<Option<Session>>>,
        lifecycle: Arc<LifecycleState>,
        mut stop_rx: oneshot::Receiver<()>,
        mut period_rx: watch::Receiver<Duration>,
    ) {
        let (on_close, cancel) = {
            let guard = session.lock().expect("polling session lock poisoned");
            match guard.as_ref() {
                Some(s) => (s.on_close.clone(), s.cancel.clone()),
                None => {
                    tracing::error!("polling run loop started without a session");
                    return;
                }
            }
        };

        let mut ticker = tokio::time::interval(*period_rx.borrow());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Consume the interval's immediate first tick; the handshake
        // request already performed the initial GET.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    tracing::debug!("stop polling");
                    lifecycle.set(Lifecycle::Stopped);
                    let _ = on_close.send(None).await;
                    return;
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("cancelled, stop polling");
                    lifecycle.set(Lifecycle::Stopped);
                    let _ = on_close.send(Some(SocketError::Cancelled)).await;
                    return;
                }
                changed = period_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            let period = *period_rx.borrow();
                            tracing::debug!(?period, "polling cadence reset");
                            ticker = tokio::time::interval(period);
                            ticker.set_missed_tick_behavior(
                                tokio::time::MissedTickBehavior::Skip,
                            );
                            ticker.tick().await;
                        }
                        Err(_) => {
                            tracing::warn!("polling ticker channel closed, stop polling");
                            lifecycle.set(Lifecycle::Stopped);
                            let _ = on_close
                                .send(Some(SocketError::TransportIo(
                                    "polling ticker channel closed".into(),
                                )))
                                .await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = Self::poll_once(http.as_ref(), &session).await {
                        tracing::error!(error = %e, "poll error");
                    }
                }
            }
        }
    }
}

impl Default for PollingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn start(&self, ctx: TransportContext) -> Result<()> {
        *self.locked_session() = Some(Session {
            url: ctx.url,
            sid: ctx.sid,
            inbound: ctx.inbound,
            on_close: ctx.on_close,
            cancel: ctx.cancel,
        });

        let (stop, stop_rx) = StopSignal::new();
        *self.stop.lock().expect("polling stop lock poisoned") = Some(stop);
        self.lifecycle.set(Lifecycle::Running);

        tokio::spawn(Self::run_loop(
            Arc::clone(&self.http),
            Arc::clone(&self.session),
            Arc::clone(&self.lifecycle),
            stop_rx,
            self.period.subscribe(),
        ));
        Ok(())
    }

    async fn request_handshake(&self) -> Result<()> {
        Self::poll_once(self.http.as_ref(), &self.session).await
    }

    fn apply_handshake(&self, handshake: &Handshake) {
        if let Some(session) = self.locked_session().as_mut() {
            session.sid = handshake.sid.clone();
        }
        let period = handshake
            .ping_interval
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PING_INTERVAL);
        let _ = self.period.send(period);
    }

    async fn send(&self, data: Vec<u8>) -> Result<()> {
        let url = {
            let guard = self.locked_session();
            let session = guard
                .as_ref()
                .ok_or_else(|| SocketError::TransportIo("polling transport not started".into()))?;
            build_url(&session.url, &session.sid)
        };
        // Check the POST result before touching the response for logging.
        self.http.post(&url, data).await?;
        tracing::debug!(url = %url, "polling POST sent");
        Ok(())
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
            .expect("polling stop lock poisoned")
            .take()
        {
            stop.fire();
        }
        Ok(())
    }
}

/// Build the per-request URL: base scheme/host/path with the query
/// overridden to `EIO=4&sid=<sid>&transport=polling`.
fn build_url(base: &Url, sid: &str) -> Url {
    let mut url = base.clone();
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("sid", sid)
        .append_pair("transport", "polling");
    url
}
