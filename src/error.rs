//! Error types for the bridge.

use crate::constants::{OpId, PromiseId};

/// A broken contract between the bridge and its host or caller.
///
/// These are not retried; the operation chain that hit one should be abandoned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// The host returned nothing where an immediate answer is required.
    #[error("host returned no response")]
    MissingResponse,

    /// A synchronous answer carried a call id.
    #[error("synchronous response carried call id {0}")]
    UnexpectedCallId(PromiseId),

    /// A completion arrived without a call id.
    #[error("completion is missing its call id")]
    MissingCallId,

    /// A completion named a call id that is not outstanding.
    #[error("no outstanding call with id {0}")]
    UnknownCallId(PromiseId),

    /// A completion arrived for an op that has no handler.
    #[error("no completion handler registered for op {0}")]
    MissingHandler(OpId),

    /// The response bytes do not form a valid envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The op 0 response is not a name -> id map.
    #[error("malformed ops map: {0}")]
    MalformedOpsMap(String),

    /// The shared region header is inconsistent.
    #[error("corrupt shared queue header: {0}")]
    CorruptHeader(String),

    /// The completion slot for a call was dropped before it was resolved.
    #[error("call {0} was abandoned before completion")]
    CallAbandoned(PromiseId),
}

/// Errors surfaced to callers of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// The `err` field of a response envelope. Displays as the host's message, verbatim.
    #[error("{message}")]
    Application { message: String },

    #[error("unknown op: {0}")]
    UnknownOp(String),

    #[error("op already registered: {0}")]
    DuplicateOp(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    RegionSize(#[from] RegionSizeError),

    #[error("failed to start op worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl BridgeError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, BridgeError::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Returned by `SharedQueue::push` when a record does not fit.
///
/// This is a signal, not a failure: the queue is left untouched and the
/// caller is expected to deliver the record another way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CapacityExceeded {
    /// Every record slot is in use.
    #[error("shared queue already holds {max} records")]
    TooManyRecords { max: usize },

    /// The aligned record end would run past the region.
    #[error("record would end at byte {needed} but the region holds {capacity}")]
    OutOfSpace { needed: usize, capacity: usize },
}

/// Returned by `SharedQueue::new` for a byte length it cannot lay out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegionSizeError {
    #[error("shared region of {byte_len} bytes cannot hold the {header}-byte header")]
    TooSmall { byte_len: usize, header: usize },

    #[error("shared region of {byte_len} bytes is past the u32 offset range")]
    TooLarge { byte_len: usize },
}
