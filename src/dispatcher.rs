//! Call path: op name -> id -> encoded args -> host call -> decoded response.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::bridge::Bridge;
use crate::constants::{OPS_MAP_OP_ID, OpId, PromiseId};
use crate::error::{BridgeError, ProtocolViolation, Result};
use crate::metrics;
use crate::op_registry::OpsMap;
use crate::protocol::{self, Envelope};

const KEY_PROMISE_ID: &str = "promiseId";

/// Result of `Bridge::send_async`.
///
/// The host has already been called by the time this exists. It resolves
/// immediately when the host answered inline, otherwise when the completion
/// for its call id is routed.
#[must_use = "the call's result is only observable by awaiting it"]
pub struct PendingCall {
    state: CallState,
}

enum CallState {
    Ready(Option<Result<Envelope>>),
    Waiting {
        promise_id: PromiseId,
        rx: oneshot::Receiver<Envelope>,
    },
}

impl PendingCall {
    fn ready(result: Result<Envelope>) -> Self {
        Self {
            state: CallState::Ready(Some(result)),
        }
    }

    /// Call id the caller is waiting on, when no immediate answer was given.
    pub fn promise_id(&self) -> Option<PromiseId> {
        match &self.state {
            CallState::Waiting { promise_id, .. } => Some(*promise_id),
            CallState::Ready(_) => None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.state, CallState::Waiting { .. })
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            CallState::Ready(slot) => match slot.take() {
                Some(result) => Poll::Ready(result.and_then(Envelope::unwrap_response)),
                None => panic!("PendingCall polled after completion"),
            },
            CallState::Waiting { promise_id, rx } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(envelope)) => Poll::Ready(envelope.unwrap_response()),
                Poll::Ready(Err(_)) => Poll::Ready(Err(
                    ProtocolViolation::CallAbandoned(*promise_id).into(),
                )),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

fn violation(v: ProtocolViolation) -> BridgeError {
    error!(%v, "protocol violation on call path");
    v.into()
}

/// `null` becomes `{}`; anything else must already be an object.
fn args_object(args: Value) -> Result<Map<String, Value>> {
    match args {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(BridgeError::InvalidArgs(format!(
            "async call arguments must be a JSON object, got {other}"
        ))),
    }
}

impl Bridge {
    /// Name -> id map, fetched from the host through op 0 on first use.
    pub fn ops(&self) -> Result<&OpsMap> {
        if let Some(ops) = self.ops.get() {
            return Ok(ops);
        }
        let bytes = self
            .dispatch(OPS_MAP_OP_ID, &[], None)
            .ok_or_else(|| violation(ProtocolViolation::MissingResponse))?;
        let ops = OpsMap::from_json_bytes(&bytes).map_err(violation)?;
        debug!(count = ops.len(), "ops map loaded");
        Ok(self.ops.get_or_init(|| ops))
    }

    pub fn op_id(&self, op_name: &str) -> Result<OpId> {
        self.ops()?
            .get(op_name)
            .ok_or_else(|| BridgeError::UnknownOp(op_name.to_string()))
    }

    /// Raw transport: hand `control` to the host as-is.
    pub fn dispatch(&self, op_id: OpId, control: &[u8], zero_copy: Option<&[u8]>) -> Option<Vec<u8>> {
        self.host.borrow_mut().call(op_id, control, zero_copy)
    }

    /// Blocking call. The host must answer inline and without a call id.
    pub fn send_sync(&self, op_name: &str, args: Value, zero_copy: Option<&[u8]>) -> Result<Value> {
        let op_id = self.op_id(op_name)?;
        debug!(op_name, op_id, "send_sync");
        metrics::inc_sync_calls();

        let args = if args.is_null() { Value::Object(Map::new()) } else { args };
        let control = protocol::encode_value(self.context.codec(), &args);
        let response = self
            .dispatch(op_id, &control, zero_copy)
            .ok_or_else(|| violation(ProtocolViolation::MissingResponse))?;

        let envelope = self.context.decode_envelope(&response)?;
        if let Some(promise_id) = envelope.promise_id {
            return Err(violation(ProtocolViolation::UnexpectedCallId(promise_id)));
        }
        envelope.unwrap_response()
    }

    /// Asynchronous call. Dispatches now; the returned future yields the result.
    ///
    /// A fresh call id is merged into `args` as `promiseId`. If the host answers
    /// inline no correlation entry is created.
    pub fn send_async(&self, op_name: &str, args: Value, zero_copy: Option<&[u8]>) -> PendingCall {
        match self.start_async(op_name, args, zero_copy) {
            Ok(call) => call,
            Err(e) => PendingCall::ready(Err(e)),
        }
    }

    fn start_async(&self, op_name: &str, args: Value, zero_copy: Option<&[u8]>) -> Result<PendingCall> {
        self.maybe_init();
        let op_id = self.op_id(op_name)?;
        let mut args = args_object(args)?;

        let promise_id = self.context.pending.borrow_mut().next_promise_id();
        args.insert(KEY_PROMISE_ID.to_string(), Value::from(promise_id));
        debug!(op_name, op_id, promise_id, "send_async");
        metrics::inc_async_calls();

        let control = protocol::encode_value(self.context.codec(), &Value::Object(args));
        match self.dispatch(op_id, &control, zero_copy) {
            Some(response) => {
                debug!(promise_id, "host answered inline");
                Ok(PendingCall::ready(self.context.decode_envelope(&response)))
            }
            None => {
                let rx = self.context.pending.borrow_mut().insert(promise_id);
                Ok(PendingCall {
                    state: CallState::Waiting { promise_id, rx },
                })
            }
        }
    }
}
