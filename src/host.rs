//! What the bridge needs from the host runtime.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::constants::OpId;
use crate::error::{BridgeError, Result};
use crate::metrics;
use crate::shared_queue::SharedQueue;

/// The shared region, as seen by both sides.
pub type SharedRegion = Rc<RefCell<SharedQueue>>;

/// The single host-invoked entry point.
///
/// `Some(payload)`: one completed record for `op_id`, delivered directly.
/// `None`: drain the shared region.
pub type NotificationCallback = Box<dyn FnMut(OpId, Option<&[u8]>) -> Result<()>>;

pub trait Host {
    /// The region completions are batched through. Must be the same region on every call.
    fn shared_region(&self) -> SharedRegion;

    /// Called exactly once, when the bridge initializes.
    fn register_notification_callback(&mut self, callback: NotificationCallback);

    /// Blocking transport. `None` means "no immediate answer, expect a notification".
    fn call(&mut self, op_id: OpId, control: &[u8], zero_copy: Option<&[u8]>) -> Option<Vec<u8>>;

    /// Deliver whatever completions are ready now. Returns how many were delivered.
    fn poll(&mut self) -> Result<usize> {
        Ok(0)
    }
}

/// Push completed records into the shared region and notify.
///
/// A record that does not fit is delivered directly. Records already queued
/// are drained first so delivery stays in completion order. One drain
/// notification follows the batch if anything is still queued, including
/// records an earlier failed drain left behind.
///
/// A callback error does not stop the batch: every completion is still
/// queued or delivered, and the first error is returned at the end.
pub fn deliver_completions<I>(
    region: &SharedRegion,
    callback: &mut NotificationCallback,
    completions: I,
) -> Result<usize>
where
    I: IntoIterator<Item = (OpId, Vec<u8>)>,
{
    let mut delivered = 0;
    let mut first_err = None;

    for (op_id, payload) in completions {
        // Borrow ends before the callback runs: draining re-borrows the region.
        let pushed = region.borrow_mut().push(op_id, &payload);
        match pushed {
            Ok(()) => trace!(op_id, len = payload.len(), "completion queued"),
            Err(reason) => {
                warn!(op_id, %reason, "shared queue full, delivering directly");
                keep_first(&mut first_err, drain_queued(region, callback));
                metrics::inc_direct_deliveries();
                keep_first(&mut first_err, callback(op_id, Some(&payload)));
            }
        }
        delivered += 1;
    }

    keep_first(&mut first_err, drain_queued(region, callback));
    match first_err {
        Some(e) => Err(e),
        None => Ok(delivered),
    }
}

/// Send a drain notification if the region holds live records.
fn drain_queued(region: &SharedRegion, callback: &mut NotificationCallback) -> Result<()> {
    let front = region.borrow().front_op_id();
    match front {
        Some(op_id) => callback(op_id, None),
        None => Ok(()),
    }
}

fn keep_first(first: &mut Option<BridgeError>, result: Result<()>) {
    if let Err(e) = result {
        warn!(%e, "completion delivery failed, continuing with the batch");
        first.get_or_insert(e);
    }
}
