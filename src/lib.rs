//! Library crate for opbridge: a call-dispatch bridge between a caller and a host runtime.
//!
//! Callers resolve ops by name and call them synchronously (`Bridge::send_sync`) or
//! asynchronously (`Bridge::send_async`). Async completions come back through a
//! fixed-layout shared queue (`shared_queue`) that the host fills and the bridge
//! drains, or directly when the queue is full. Two hosts ship with the crate:
//! `loopback` (single thread, used by tests) and `worker_host` (ops on a worker
//! thread behind disruptor rings, used by the binary).

pub mod bridge;
pub mod completion_router;
pub mod config;
pub mod constants;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod loopback;
pub mod metrics;
pub mod op_registry;
pub mod protocol;
pub mod shared_queue;
pub mod worker_host;

pub use bridge::{Bridge, BridgeContext};
pub use dispatcher::PendingCall;
pub use error::{BridgeError, CapacityExceeded, ProtocolViolation, RegionSizeError, Result};
pub use host::Host;
