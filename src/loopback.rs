//! In-process host on the bridge's own thread.
//!
//! Sync ops answer inline. Async ops run at call time but their completion is
//! held back until `flush` (or `Bridge::poll_host`), which pushes it through
//! the shared region like a real host would. `LoopbackHost` is a cheap handle:
//! clones share state, so a test can keep one while the bridge owns another.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::constants::{OPS_MAP_OP_ID, OpId};
use crate::error::Result;
use crate::host::{self, Host, NotificationCallback, SharedRegion};
use crate::op_registry::OpTable;
use crate::protocol::{self, Envelope, Utf8Codec};
use crate::shared_queue::SharedQueue;

/// Op body: decoded args and optional zero-copy bytes in, success value or error message out.
pub type OpFn = Box<dyn Fn(&Value, Option<&[u8]>) -> std::result::Result<Value, String>>;

/// Op body that sees and produces raw bytes. `None` means "no immediate answer".
pub type RawOpFn = Box<dyn Fn(&[u8], Option<&[u8]>) -> Option<Vec<u8>>>;

enum LoopbackOp {
    Sync(OpFn),
    Async(OpFn),
    Raw(RawOpFn),
}

struct Inner {
    region: SharedRegion,
    callback: Option<NotificationCallback>,
    registrations: usize,
    table: OpTable,
    ops: HashMap<OpId, LoopbackOp>,
    completed: VecDeque<(OpId, Vec<u8>)>,
    calls: HashMap<OpId, usize>,
}

#[derive(Clone)]
pub struct LoopbackHost {
    inner: Rc<RefCell<Inner>>,
}

/// Host with a shared region of `RECOMMENDED_SIZE` bytes.
impl Default for LoopbackHost {
    fn default() -> Self {
        Self::with_queue(SharedQueue::default())
    }
}

impl LoopbackHost {
    /// Host with a shared region of `shared_size` bytes.
    pub fn new(shared_size: usize) -> Result<Self> {
        Ok(Self::with_queue(SharedQueue::new(shared_size)?))
    }

    fn with_queue(queue: SharedQueue) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                region: Rc::new(RefCell::new(queue)),
                callback: None,
                registrations: 0,
                table: OpTable::new(),
                ops: HashMap::new(),
                completed: VecDeque::new(),
                calls: HashMap::new(),
            })),
        }
    }

    fn register(&self, name: &str, op: LoopbackOp) -> Result<OpId> {
        let mut inner = self.inner.borrow_mut();
        let op_id = inner.table.register(name)?;
        inner.ops.insert(op_id, op);
        Ok(op_id)
    }

    /// Op answered inline, whether called sync or async.
    pub fn register_sync<F>(&self, name: &str, op: F) -> Result<OpId>
    where
        F: Fn(&Value, Option<&[u8]>) -> std::result::Result<Value, String> + 'static,
    {
        self.register(name, LoopbackOp::Sync(Box::new(op)))
    }

    /// Op whose completion is delivered on the next flush.
    pub fn register_async<F>(&self, name: &str, op: F) -> Result<OpId>
    where
        F: Fn(&Value, Option<&[u8]>) -> std::result::Result<Value, String> + 'static,
    {
        self.register(name, LoopbackOp::Async(Box::new(op)))
    }

    /// Op that controls the exact bytes returned, for exercising contract violations.
    pub fn register_raw<F>(&self, name: &str, op: F) -> Result<OpId>
    where
        F: Fn(&[u8], Option<&[u8]>) -> Option<Vec<u8>> + 'static,
    {
        self.register(name, LoopbackOp::Raw(Box::new(op)))
    }

    pub fn op_id(&self, name: &str) -> Option<OpId> {
        self.inner.borrow().table.id(name)
    }

    pub fn has_callback(&self) -> bool {
        self.inner.borrow().callback.is_some()
    }

    pub fn callback_registrations(&self) -> usize {
        self.inner.borrow().registrations
    }

    /// How many times `op_id` was called.
    pub fn calls_to(&self, op_id: OpId) -> usize {
        self.inner.borrow().calls.get(&op_id).copied().unwrap_or(0)
    }

    /// Completions held back until the next flush.
    pub fn queued_completions(&self) -> usize {
        self.inner.borrow().completed.len()
    }

    /// Hold back an arbitrary completion payload for `op_id`.
    pub fn queue_completion(&self, op_id: OpId, payload: Vec<u8>) {
        self.inner.borrow_mut().completed.push_back((op_id, payload));
    }

    /// Invoke the registered notification callback directly.
    pub fn notify(&self, op_id: OpId, payload: Option<&[u8]>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.callback.as_mut() {
            Some(callback) => callback(op_id, payload),
            None => Ok(()),
        }
    }

    /// Deliver held-back completions through the shared region.
    ///
    /// Nothing is delivered before the bridge has registered its callback.
    /// Records left in the region by an earlier failed drain are drained again
    /// even when nothing new is held back.
    pub fn flush(&self) -> Result<usize> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let Some(callback) = inner.callback.as_mut() else {
            return Ok(0);
        };
        let completed: Vec<_> = inner.completed.drain(..).collect();
        if !completed.is_empty() {
            debug!(count = completed.len(), "flushing completions");
        }
        host::deliver_completions(&inner.region, callback, completed)
    }

    fn call_op(&self, op_id: OpId, control: &[u8], zero_copy: Option<&[u8]>) -> Option<Vec<u8>> {
        let mut inner = self.inner.borrow_mut();
        *inner.calls.entry(op_id).or_default() += 1;
        if op_id == OPS_MAP_OP_ID {
            return Some(inner.table.json_map());
        }

        let Some(op) = inner.ops.get(&op_id) else {
            return Some(encode(&Envelope::err(format!("unknown op id {op_id}"))));
        };
        let (run, deferred) = match op {
            LoopbackOp::Raw(run) => return run(control, zero_copy),
            LoopbackOp::Sync(run) => (run, false),
            LoopbackOp::Async(run) => (run, true),
        };

        let args = match protocol::decode_value(&Utf8Codec, control) {
            Ok(args) => args,
            Err(e) => return Some(encode(&Envelope::err(e.to_string()))),
        };
        let promise_id = args.get("promiseId").and_then(Value::as_u64);
        let mut envelope = match run(&args, zero_copy) {
            Ok(value) => Envelope::ok(value),
            Err(message) => Envelope::err(message),
        };
        if let Some(id) = promise_id {
            envelope = envelope.with_promise_id(id);
        }

        match (deferred, promise_id) {
            (true, Some(_)) => {
                inner.completed.push_back((op_id, encode(&envelope)));
                None
            }
            (true, None) => Some(encode(&Envelope::err(format!(
                "op {op_id} is asynchronous and needs a promiseId"
            )))),
            (false, _) => Some(encode(&envelope)),
        }
    }
}

fn encode(envelope: &Envelope) -> Vec<u8> {
    protocol::encode_envelope(&Utf8Codec, envelope)
}

impl Host for LoopbackHost {
    fn shared_region(&self) -> SharedRegion {
        Rc::clone(&self.inner.borrow().region)
    }

    fn register_notification_callback(&mut self, callback: NotificationCallback) {
        let mut inner = self.inner.borrow_mut();
        inner.callback = Some(callback);
        inner.registrations += 1;
    }

    fn call(&mut self, op_id: OpId, control: &[u8], zero_copy: Option<&[u8]>) -> Option<Vec<u8>> {
        self.call_op(op_id, control, zero_copy)
    }

    fn poll(&mut self) -> Result<usize> {
        self.flush()
    }
}

impl std::fmt::Debug for LoopbackHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("LoopbackHost")
            .field("ops", &inner.table.len())
            .field("queued_completions", &inner.completed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegionSizeError;
    use serde_json::json;

    #[test]
    fn op_zero_returns_table() {
        let mut host = LoopbackHost::default();
        host.register_sync("op_echo", |args, _| Ok(args.clone()))
            .expect("register");
        let bytes = host.call(OPS_MAP_OP_ID, &[], None).expect("answer");
        let map: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(map, json!({"ops": 0, "op_echo": 1}));
    }

    #[test]
    fn async_op_defers_and_echoes_promise_id() {
        let mut host = LoopbackHost::default();
        let op_id = host
            .register_async("op_double", |args, _| {
                Ok(json!(args["n"].as_i64().unwrap_or(0) * 2))
            })
            .expect("register");

        let answer = host.call(op_id, br#"{"n":21,"promiseId":8}"#, None);
        assert!(answer.is_none());
        assert_eq!(host.queued_completions(), 1);

        let (queued_op, payload) = host
            .inner
            .borrow_mut()
            .completed
            .pop_front()
            .expect("queued");
        assert_eq!(queued_op, op_id);
        let envelope =
            protocol::decode_envelope(&Utf8Codec, &payload).expect("envelope");
        assert_eq!(envelope, Envelope::ok(json!(42)).with_promise_id(8));
    }

    #[test]
    fn unknown_op_answers_with_error() {
        let mut host = LoopbackHost::default();
        let bytes = host.call(99, b"{}", None).expect("answer");
        let envelope = protocol::decode_envelope(&Utf8Codec, &bytes).expect("envelope");
        assert!(envelope.unwrap_response().is_err());
    }

    #[test]
    fn region_too_small_for_header_is_an_error() {
        assert!(matches!(
            LoopbackHost::new(100),
            Err(crate::BridgeError::RegionSize(RegionSizeError::TooSmall { byte_len: 100, .. }))
        ));
    }

    #[test]
    fn flush_without_callback_keeps_completions() {
        let host = LoopbackHost::default();
        host.queue_completion(1, b"{}".to_vec());
        assert_eq!(host.flush().expect("flush"), 0);
        assert_eq!(host.queued_completions(), 1);
    }
}
