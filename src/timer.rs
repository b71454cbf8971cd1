//! Monotonic timer source for acknowledgement timeouts.
//!
//! The trait exists so tests can replace wall-clock sleeps with a
//! scripted source; production code uses [`TokioTimer`].

use std::time::Duration;

use futures_util::future::BoxFuture;

/// A source of one-shot delays.
///
/// Implementations must be safe to call from multiple tasks at once.
pub trait Timer: Send + Sync {
    /// Returns a future that completes after `duration` has elapsed.
    fn after(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// The default [`Timer`] backed by [`tokio::time::sleep`].
///
/// Honors `tokio::time::pause` in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn after(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
