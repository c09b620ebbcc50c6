//! Completion routing: host notifications -> per-op handlers -> waiting callers.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, error, trace};

use crate::bridge::{Bridge, BridgeContext};
use crate::constants::OpId;
use crate::error::{BridgeError, ProtocolViolation, Result};
use crate::metrics;
use crate::protocol::{self, Envelope};

/// Turns one raw completion payload into a resolution.
pub type AsyncHandler = Rc<dyn Fn(&BridgeContext, &[u8]) -> Result<()>>;

#[derive(Default)]
pub struct CompletionRouter {
    handlers: HashMap<OpId, AsyncHandler>,
}

impl CompletionRouter {
    /// Returns the handler previously registered for `op_id`, if any.
    pub fn set_handler(&mut self, op_id: OpId, handler: AsyncHandler) -> Option<AsyncHandler> {
        self.handlers.insert(op_id, handler)
    }

    pub fn handler(&self, op_id: OpId) -> Option<AsyncHandler> {
        self.handlers.get(&op_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The handler most JSON ops use: resolve the caller named by the envelope's call id.
pub fn json_completion_handler() -> AsyncHandler {
    Rc::new(|context: &BridgeContext, payload: &[u8]| context.complete_from_host(payload))
}

fn violation(v: ProtocolViolation) -> BridgeError {
    error!(%v, "protocol violation while routing completion");
    v.into()
}

impl BridgeContext {
    /// Single host-invoked entry point.
    ///
    /// With a payload: one record for `op_id` that bypassed the shared region.
    /// Without: drain the shared region, routing each record by its own op id.
    pub fn on_host_notification(&self, op_id: OpId, payload: Option<&[u8]>) -> Result<()> {
        match payload {
            Some(bytes) => {
                trace!(op_id, len = bytes.len(), "direct completion");
                self.route(op_id, bytes)
            }
            None => self.drain().map(|_| ()),
        }
    }

    /// Shift records until the shared region reports empty. Returns how many were routed.
    ///
    /// A record that fails to route does not stop the drain. The first such
    /// error is returned once the region is empty.
    pub fn drain(&self) -> Result<usize> {
        let Some(region) = self.shared.get() else {
            return Err(violation(ProtocolViolation::CorruptHeader(
                "drain requested before the shared region was initialized".to_string(),
            )));
        };

        let mut routed = 0;
        let mut first_err = None;
        let mut queue = region.borrow_mut();
        // Handlers run while the region is borrowed; they reach only the correlation table.
        while let Some(record) = queue.shift().map_err(violation)? {
            trace!(op_id = record.op_id, len = record.payload.len(), "shifted record");
            match self.route(record.op_id, record.payload) {
                Ok(()) => routed += 1,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        metrics::inc_drains(routed);
        debug!(routed, "drained shared queue");
        match first_err {
            Some(e) => Err(e),
            None => Ok(routed),
        }
    }

    fn route(&self, op_id: OpId, payload: &[u8]) -> Result<()> {
        let handler = self.router.borrow().handler(op_id);
        let handler = handler.ok_or_else(|| violation(ProtocolViolation::MissingHandler(op_id)))?;
        handler(self, payload)
    }

    pub fn decode_envelope(&self, payload: &[u8]) -> Result<Envelope> {
        protocol::decode_envelope(self.codec(), payload).map_err(violation)
    }

    /// Decode `payload`, remove its outstanding call and resolve it.
    pub fn complete_from_host(&self, payload: &[u8]) -> Result<()> {
        let envelope = self.decode_envelope(payload)?;
        let promise_id = envelope
            .promise_id
            .ok_or_else(|| violation(ProtocolViolation::MissingCallId))?;
        let slot = self
            .pending
            .borrow_mut()
            .take(promise_id)
            .ok_or_else(|| violation(ProtocolViolation::UnknownCallId(promise_id)))?;

        metrics::inc_completions();
        if slot.send(envelope).is_err() {
            debug!(promise_id, "caller went away before its completion arrived");
        }
        Ok(())
    }
}

impl Bridge {
    /// Register the handler for completions of `op_id`. Required before any async call of that op can complete.
    pub fn set_async_handler(&self, op_id: OpId, handler: AsyncHandler) {
        self.maybe_init();
        if self
            .context
            .router
            .borrow_mut()
            .set_handler(op_id, handler)
            .is_some()
        {
            debug!(op_id, "replaced completion handler");
        }
    }

    /// Route completions of `op_name` through `complete_from_host`.
    pub fn register_json_completion(&self, op_name: &str) -> Result<OpId> {
        let op_id = self.op_id(op_name)?;
        self.set_async_handler(op_id, json_completion_handler());
        Ok(op_id)
    }
}
