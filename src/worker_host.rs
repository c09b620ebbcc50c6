//! Threaded host: async ops run on a dedicated worker thread.
//!
//! Requests cross to the worker over a disruptor SPSC ring and completions
//! come back over a second one. The shared region never leaves the bridge
//! thread: `poll` drains the completion ring and pushes what it finds
//! through `host::deliver_completions`.
//!
//! Sync ops (and op 0) are answered inline on the calling thread.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::thread::{self, JoinHandle};

use disruptor::{
    BusySpin, EventPoller, Polling, Producer, SingleConsumerBarrier, SingleProducer,
    SingleProducerBarrier, build_single_producer,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{COMPLETION_RING_SIZE, REQUEST_RING_SIZE};
use crate::constants::{OPS_MAP_OP_ID, OpId, PromiseId};
use crate::error::Result;
use crate::host::{self, Host, NotificationCallback, SharedRegion};
use crate::op_registry::OpTable;
use crate::protocol::{self, Envelope, Utf8Codec};
use crate::shared_queue::SharedQueue;

/// Op body. Runs on the worker thread for async ops, so it must be `Send + Sync`.
pub type WorkerOpFn =
    Box<dyn Fn(&Value, Option<&[u8]>) -> std::result::Result<Value, String> + Send + Sync>;

/// Entry in the request ring. Pre-allocated per slot via factory.
pub struct OpRequest {
    pub op_id: OpId,
    pub promise_id: PromiseId,
    pub args: Value,
    pub has_zero_copy: bool,
    pub zero_copy: Vec<u8>,
}

impl OpRequest {
    pub fn factory() -> Self {
        Self {
            op_id: 0,
            promise_id: 0,
            args: Value::Null,
            has_zero_copy: false,
            zero_copy: Vec::new(),
        }
    }

    pub fn zero_copy(&self) -> Option<&[u8]> {
        self.has_zero_copy.then_some(self.zero_copy.as_slice())
    }
}

/// Entry in the completion ring: an encoded envelope for `op_id`.
pub struct OpCompletion {
    pub op_id: OpId,
    pub payload: Vec<u8>,
}

impl OpCompletion {
    pub fn factory() -> Self {
        Self {
            op_id: 0,
            payload: Vec::new(),
        }
    }
}

pub type RequestProducer = SingleProducer<OpRequest, SingleConsumerBarrier>;
pub type RequestPoller = EventPoller<OpRequest, SingleProducerBarrier>;
pub type CompletionPoller = EventPoller<OpCompletion, SingleProducerBarrier>;

/// Producer half of the completion ring; lives on the worker thread.
pub struct CompletionProducer {
    pub producer: SingleProducer<OpCompletion, SingleConsumerBarrier>,
}

impl CompletionProducer {
    pub fn send(&mut self, op_id: OpId, payload: Vec<u8>) {
        self.producer.publish(|slot| {
            slot.op_id = op_id;
            slot.payload = payload;
        });
    }
}

/// Build a matched producer/poller pair for the completion ring.
pub fn build_completion_channel(capacity: usize) -> (CompletionProducer, CompletionPoller) {
    let builder = build_single_producer(capacity, OpCompletion::factory, BusySpin);
    let (poller, builder) = builder.event_poller();
    let producer = builder.build();

    (CompletionProducer { producer }, poller)
}

/// Build a matched producer/poller pair for the request ring.
pub fn build_request_channel(capacity: usize) -> (RequestProducer, RequestPoller) {
    let builder = build_single_producer(capacity, OpRequest::factory, BusySpin);
    let (poller, builder) = builder.event_poller();
    (builder.build(), poller)
}

/// Worker loop: consumes requests, runs the op, publishes the encoded envelope.
pub struct Worker {
    pub poller: RequestPoller,
    pub completions: CompletionProducer,
    pub ops: HashMap<OpId, WorkerOpFn>,
}

impl Worker {
    /// Handle whatever one poll returns. `Err` is the poller's stall or shutdown signal.
    pub fn process_one_poll_cycle(&mut self) -> std::result::Result<usize, Polling> {
        let mut guard = self.poller.poll()?;
        let mut processed = 0;
        for request in &mut guard {
            let envelope = match self.ops.get(&request.op_id) {
                Some(op) => match op(&request.args, request.zero_copy()) {
                    Ok(value) => Envelope::ok(value),
                    Err(message) => Envelope::err(message),
                },
                None => Envelope::err(format!("op {} is not served by this worker", request.op_id)),
            };
            let payload = protocol::encode_envelope(
                &Utf8Codec,
                &envelope.with_promise_id(request.promise_id),
            );
            self.completions.send(request.op_id, payload);
            processed += 1;
        }
        Ok(processed)
    }

    pub fn run(mut self) {
        loop {
            match self.process_one_poll_cycle() {
                Ok(_) => {}
                Err(Polling::NoEvents) => {
                    std::hint::spin_loop();
                }
                Err(Polling::Shutdown) => {
                    return;
                }
            }
        }
    }
}

/// Collects op registrations, then spawns the worker.
#[derive(Default)]
pub struct WorkerHostBuilder {
    table: OpTable,
    inline: HashMap<OpId, WorkerOpFn>,
    offloaded: HashMap<OpId, WorkerOpFn>,
}

impl WorkerHostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Op answered inline on the calling thread.
    pub fn sync<F>(mut self, name: &str, op: F) -> Result<Self>
    where
        F: Fn(&Value, Option<&[u8]>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        let op_id = self.table.register(name)?;
        self.inline.insert(op_id, Box::new(op));
        Ok(self)
    }

    /// Op run on the worker thread; its completion arrives through the shared region.
    pub fn async_op<F>(mut self, name: &str, op: F) -> Result<Self>
    where
        F: Fn(&Value, Option<&[u8]>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        let op_id = self.table.register(name)?;
        self.offloaded.insert(op_id, Box::new(op));
        Ok(self)
    }

    /// Start the worker thread. `shared_size` is the byte size of the shared region.
    pub fn spawn(self, shared_size: usize) -> Result<WorkerHost> {
        let region = SharedQueue::new(shared_size)?;
        let (requests, request_poller) = build_request_channel(REQUEST_RING_SIZE);
        let (completion_producer, completions) = build_completion_channel(COMPLETION_RING_SIZE);

        let deferred: HashSet<OpId> = self.offloaded.keys().copied().collect();
        let worker = Worker {
            poller: request_poller,
            completions: completion_producer,
            ops: self.offloaded,
        };
        let handle = thread::Builder::new()
            .name("op-worker".into())
            .spawn(move || worker.run())?;
        info!(
            ops = self.table.len(),
            offloaded = deferred.len(),
            shared_size,
            "op worker started"
        );

        Ok(WorkerHost {
            region: Rc::new(RefCell::new(region)),
            callback: None,
            table: self.table,
            inline: self.inline,
            deferred,
            requests: Some(requests),
            completions,
            in_flight: 0,
            worker: Some(handle),
        })
    }
}

pub struct WorkerHost {
    region: SharedRegion,
    callback: Option<NotificationCallback>,
    table: OpTable,
    inline: HashMap<OpId, WorkerOpFn>,
    deferred: HashSet<OpId>,
    requests: Option<RequestProducer>,
    completions: CompletionPoller,
    in_flight: usize,
    worker: Option<JoinHandle<()>>,
}

impl WorkerHost {
    pub fn builder() -> WorkerHostBuilder {
        WorkerHostBuilder::new()
    }

    /// Requests handed to the worker whose completions have not been delivered yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Also drains records an earlier failed drain left in the region.
    fn deliver_ready(&mut self) -> Result<usize> {
        let Some(callback) = self.callback.as_mut() else {
            return Ok(0);
        };
        let ready = collect_completions(&mut self.completions);
        if !ready.is_empty() {
            self.in_flight -= ready.len();
            debug!(count = ready.len(), in_flight = self.in_flight, "delivering completions");
        }
        host::deliver_completions(&self.region, callback, ready)
    }

    fn answer_inline(&self, op: &WorkerOpFn, args: &Value, zero_copy: Option<&[u8]>) -> Vec<u8> {
        let mut envelope = match op(args, zero_copy) {
            Ok(value) => Envelope::ok(value),
            Err(message) => Envelope::err(message),
        };
        if let Some(id) = args.get("promiseId").and_then(Value::as_u64) {
            envelope = envelope.with_promise_id(id);
        }
        protocol::encode_envelope(&Utf8Codec, &envelope)
    }

    /// Hand an async call to the worker. `Err` carries the message to answer the call with.
    fn offload(
        &mut self,
        op_id: OpId,
        promise_id: PromiseId,
        args: Value,
        zero_copy: Option<&[u8]>,
    ) -> std::result::Result<(), String> {
        // Keep every outstanding completion fitting in the completion ring so
        // the worker never stalls on it while this thread stalls on requests.
        while self.in_flight >= COMPLETION_RING_SIZE {
            if self.callback.is_none() {
                warn!(in_flight = self.in_flight, "completion ring full before the bridge registered");
                return Err(format!(
                    "{} calls in flight and no notification callback to deliver them",
                    self.in_flight
                ));
            }
            match self.deliver_ready() {
                Ok(_) => std::hint::spin_loop(),
                // Completions collected so far were still delivered.
                Err(e) => warn!(%e, "delivering completions under backpressure failed"),
            }
        }

        let Some(requests) = self.requests.as_mut() else {
            return Err("op worker has shut down".to_string());
        };
        requests.publish(|slot| {
            slot.op_id = op_id;
            slot.promise_id = promise_id;
            slot.args = args;
            slot.has_zero_copy = zero_copy.is_some();
            slot.zero_copy.clear();
            if let Some(bytes) = zero_copy {
                slot.zero_copy.extend_from_slice(bytes);
            }
        });
        self.in_flight += 1;
        Ok(())
    }
}

/// Pull every completion currently in the ring. Payloads are copied out of the slots.
fn collect_completions(poller: &mut CompletionPoller) -> Vec<(OpId, Vec<u8>)> {
    let mut ready = Vec::new();
    loop {
        match poller.poll() {
            Ok(mut guard) => {
                for completion in &mut guard {
                    ready.push((completion.op_id, completion.payload.clone()));
                }
            }
            Err(Polling::NoEvents) => break,
            Err(Polling::Shutdown) => {
                warn!("op worker has shut down");
                break;
            }
        }
    }
    ready
}

fn encode_err(message: String) -> Vec<u8> {
    protocol::encode_envelope(&Utf8Codec, &Envelope::err(message))
}

impl Host for WorkerHost {
    fn shared_region(&self) -> SharedRegion {
        Rc::clone(&self.region)
    }

    fn register_notification_callback(&mut self, callback: NotificationCallback) {
        self.callback = Some(callback);
    }

    fn call(&mut self, op_id: OpId, control: &[u8], zero_copy: Option<&[u8]>) -> Option<Vec<u8>> {
        if op_id == OPS_MAP_OP_ID {
            return Some(self.table.json_map());
        }
        let args = match protocol::decode_value(&Utf8Codec, control) {
            Ok(args) => args,
            Err(e) => return Some(encode_err(e.to_string())),
        };

        if let Some(op) = self.inline.get(&op_id) {
            return Some(self.answer_inline(op, &args, zero_copy));
        }
        if !self.deferred.contains(&op_id) {
            return Some(encode_err(format!("unknown op id {op_id}")));
        }
        match args.get("promiseId").and_then(Value::as_u64) {
            Some(promise_id) => match self.offload(op_id, promise_id, args, zero_copy) {
                Ok(()) => None,
                Err(message) => Some(encode_err(message)),
            },
            None => Some(encode_err(format!(
                "op {op_id} is asynchronous and needs a promiseId"
            ))),
        }
    }

    fn poll(&mut self) -> Result<usize> {
        self.deliver_ready()
    }
}

impl Drop for WorkerHost {
    fn drop(&mut self) {
        // Dropping the producer shuts the request ring down; the worker returns on Shutdown.
        drop(self.requests.take());
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("op worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost")
            .field("ops", &self.table.len())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
