//! Namespace registry entries.
//!
//! A namespace is a logical channel multiplexed over one session. It
//! owns the per-event handler lists, the wildcard handler list, and the
//! one-shot "connected" latch released by the server's Connect response.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::handler::RawHandler;
use crate::latch::Latch;

pub(crate) struct Namespace {
    name: String,
    handlers: RwLock<HashMap<String, Vec<RawHandler>>>,
    any_handlers: RwLock<Vec<RawHandler>>,
    connected: Latch,
}

impl Namespace {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: RwLock::new(HashMap::new()),
            any_handlers: RwLock::new(Vec::new()),
            connected: Latch::armed(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Append a handler for `event`.
    pub(crate) fn on(&self, event: impl Into<String>, handler: RawHandler) {
        self.handlers
            .write()
            .expect("namespace handler lock poisoned")
            .entry(event.into())
            .or_default()
            .push(handler);
    }

    /// Append a wildcard handler, invoked for every event with the event
    /// name prepended to the payloads.
    pub(crate) fn on_any(&self, handler: RawHandler) {
        self.any_handlers
            .write()
            .expect("namespace handler lock poisoned")
            .push(handler);
    }

    /// Snapshot the handlers registered for `event`. Cloning out keeps
    /// invocation free of the registry lock.
    pub(crate) fn handlers_for(&self, event: &str) -> Vec<RawHandler> {
        self.handlers
            .read()
            .expect("namespace handler lock poisoned")
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot the wildcard handlers.
    pub(crate) fn any_handlers(&self) -> Vec<RawHandler> {
        self.any_handlers
            .read()
            .expect("namespace handler lock poisoned")
            .clone()
    }

    /// Release the connected latch. Idempotent: repeated Connect packets
    /// for the same namespace are tolerated.
    pub(crate) fn mark_connected(&self) {
        self.connected.release();
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.is_released()
    }

    /// Wait until the server has acknowledged this namespace.
    #[allow(dead_code)]
    pub(crate) async fn wait_connected(&self) {
        self.connected.wait().await;
    }
}
