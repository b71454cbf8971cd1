//! Acknowledgement bookkeeping.
//!
//! Every emit that wants an ack gets an id from a strictly monotonic
//! counter and a slot in the table. The slot is taken exactly once: by
//! the matching Ack packet, by timeout expiry, or by cancellation.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::handler::RawHandler;
use crate::payload::Payload;

/// What happens when the ack arrives.
pub(crate) enum AckSlot {
    /// Invoke the bound handler directly.
    Handler(RawHandler),
    /// Wake the per-emit timeout task with the payloads.
    Waiter(oneshot::Sender<Vec<Payload>>),
}

#[derive(Default)]
struct AckTableInner {
    counter: u64,
    slots: HashMap<u64, AckSlot>,
}

/// Ack id allocator and slot table behind one mutex, so id assignment
/// is monotonic and removal is exactly-once.
#[derive(Default)]
pub(crate) struct AckTable {
    inner: Mutex<AckTableInner>,
}

impl AckTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and register `slot` under it.
    pub(crate) fn register(&self, slot: AckSlot) -> u64 {
        let mut inner = self.inner.lock().expect("ack table lock poisoned");
        inner.counter += 1;
        let id = inner.counter;
        inner.slots.insert(id, slot);
        id
    }

    /// Remove and return the slot for `id`, if still present.
    pub(crate) fn take(&self, id: u64) -> Option<AckSlot> {
        self.inner
            .lock()
            .expect("ack table lock poisoned")
            .slots
            .remove(&id)
    }

    /// Number of unresolved acks.
    pub(crate) fn pending(&self) -> usize {
        self.inner
            .lock()
            .expect("ack table lock poisoned")
            .slots
            .len()
    }
}
