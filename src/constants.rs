//! Shared queue binary layout. Both sides of the bridge agree on these values.
//!
//! ```text
//! word[0]               numRecords
//! word[1]               numShiftedOff
//! word[2]               head (byte offset)
//! word[3 .. 3+2*MAX)    MAX x (endByteOffset, opId)
//! byte[HEAD_INIT ..]    packed record payloads, 4-byte aligned boundaries
//! ```

/// Integer id of a registered op.
pub type OpId = u32;

/// Correlation id carried by asynchronous calls (`promiseId` on the wire).
pub type PromiseId = u64;

pub const MAX_RECORDS: usize = 100;

pub const INDEX_NUM_RECORDS: usize = 0;
pub const INDEX_NUM_SHIFTED_OFF: usize = 1;
pub const INDEX_HEAD: usize = 2;
pub const INDEX_OFFSETS: usize = 3;
pub const INDEX_RECORDS: usize = INDEX_OFFSETS + 2 * MAX_RECORDS;

/// First payload byte; also the value of `head` after a reset.
pub const HEAD_INIT: usize = 4 * INDEX_RECORDS;

/// Reserved op id: returns the name -> id map as JSON.
pub const OPS_MAP_OP_ID: OpId = 0;
pub const OPS_MAP_OP_NAME: &str = "ops";

const _: () = assert!(HEAD_INIT % 4 == 0, "header must end on a word boundary");
const _: () = assert!(
    MAX_RECORDS <= u32::MAX as usize,
    "record counters are stored as u32 words"
);
