//! Outstanding asynchronous calls, keyed by call id.
//!
//! Ids start at 1 and only grow. An entry is created when the host gives no
//! immediate answer and removed exactly once, when its completion arrives.
//! Entries never expire: a call the host never completes stays here.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::constants::PromiseId;
use crate::metrics;
use crate::protocol::Envelope;

#[derive(Debug)]
pub struct PendingCalls {
    next_id: PromiseId,
    slots: HashMap<PromiseId, oneshot::Sender<Envelope>>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            slots: HashMap::new(),
        }
    }

    /// Allocate the next call id. Rollover is not handled.
    pub fn next_promise_id(&mut self) -> PromiseId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register `promise_id` as outstanding and return the receiving end of its slot.
    pub fn insert(&mut self, promise_id: PromiseId) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        let previous = self.slots.insert(promise_id, tx);
        debug_assert!(previous.is_none(), "call id {promise_id} registered twice");
        metrics::update_outstanding(self.slots.len());
        rx
    }

    /// Remove and return the slot for `promise_id`, if it is outstanding.
    pub fn take(&mut self, promise_id: PromiseId) -> Option<oneshot::Sender<Envelope>> {
        let slot = self.slots.remove(&promise_id);
        metrics::update_outstanding(self.slots.len());
        slot
    }

    pub fn contains(&self, promise_id: PromiseId) -> bool {
        self.slots.contains_key(&promise_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
