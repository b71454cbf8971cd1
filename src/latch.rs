//! One-shot latches used to gate sends around the handshake and
//! transport-upgrade barriers.

use tokio::sync::watch;

/// A one-shot gate: starts armed (or already released), can be released
/// exactly once logically, and releases every current and future waiter.
///
/// Releasing an already-released latch is a no-op; it never panics.
#[derive(Debug)]
pub(crate) struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    /// A latch that blocks waiters until [`release`](Self::release).
    pub(crate) fn armed() -> Self {
        Self {
            tx: watch::channel(false).0,
        }
    }

    /// A latch that never blocks.
    pub(crate) fn released() -> Self {
        Self {
            tx: watch::channel(true).0,
        }
    }

    /// Open the gate. Idempotent; returns `true` only for the call that
    /// actually released the latch.
    pub(crate) fn release(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is released.
    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside `self`, so `wait_for` cannot observe a
        // closed channel while we hold `&self`.
        let _ = rx.wait_for(|released| *released).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn released_latch_does_not_block() {
        let latch = Latch::released();
        assert!(latch.is_released());
        latch.wait().await;
    }

    #[tokio::test]
    async fn armed_latch_blocks_until_release() {
        let latch = std::sync::Arc::new(Latch::armed());
        assert!(!latch.is_released());

        let waiter = {
            let latch = std::sync::Arc::clone(&latch);
            tokio::spawn(async move { latch.wait().await })
        };

        // The waiter should still be pending.
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        latch.release();
        waiter.await.expect("waiter completes after release");
    }

    #[tokio::test]
    async fn double_release_is_idempotent() {
        let latch = Latch::armed();
        assert!(latch.release());
        assert!(!latch.release());
        assert!(latch.is_released());
        latch.wait().await;
    }

    #[test]
    fn release_of_a_released_latch_reports_no_transition() {
        let latch = Latch::released();
        assert!(!latch.release());
    }

    #[tokio::test]
    async fn late_waiter_passes_released_latch() {
        let latch = Latch::armed();
        latch.release();
        latch.wait().await;
    }
}
