//! Sizing and operational configuration.
//!
//! Hardcoded values that are not part of the shared layout.
//! Layout constants (e.g. `MAX_RECORDS`, `HEAD_INIT`) live in `constants`.

use crate::constants::{HEAD_INIT, MAX_RECORDS};

/// Default byte size of the shared region, header included.
pub const RECOMMENDED_SIZE: usize = 128 * MAX_RECORDS;

/// Request ring size between the bridge thread and the op worker (disruptor capacity).
pub const REQUEST_RING_SIZE: usize = 1024;

/// Completion ring size. Must be >= REQUEST_RING_SIZE so a worker never blocks
/// on completions while the bridge thread blocks on requests.
pub const COMPLETION_RING_SIZE: usize = REQUEST_RING_SIZE;

/// Default filter for the binary when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn,opbridge=info";

// Compile-time sanity checks
const _: () = assert!(
    RECOMMENDED_SIZE > HEAD_INIT,
    "shared region must leave room for payloads past the header"
);
const _: () = assert!(
    RECOMMENDED_SIZE % 4 == 0,
    "shared region is addressed as u32 words"
);
const _: () = assert!(
    REQUEST_RING_SIZE.is_power_of_two(),
    "disruptor capacity must be a power of two"
);
const _: () = assert!(
    COMPLETION_RING_SIZE >= REQUEST_RING_SIZE,
    "completion ring smaller than request ring can deadlock the worker"
);
