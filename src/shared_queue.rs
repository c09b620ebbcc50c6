//! Fixed-capacity shared queue of completed-call records.
//!
//! The region is one allocation of `u32` words. The header is read and written
//! through the word view; payloads through a byte view over the same storage
//! (`bytemuck::cast_slice`). Every record end is rounded up to a multiple of 4
//! so the next record starts on a word boundary.
//!
//! # Access model
//!
//! No locks and no atomics: the scripting side and the host take strict turns
//! over the region. A host that runs ops on other threads must hand completed
//! records back to the thread that owns the queue before pushing them
//! (see `worker_host`).

use crate::constants::{
    HEAD_INIT, INDEX_HEAD, INDEX_NUM_RECORDS, INDEX_NUM_SHIFTED_OFF, INDEX_OFFSETS, INDEX_RECORDS,
    MAX_RECORDS, OpId,
};
use crate::config::RECOMMENDED_SIZE;
use crate::error::{CapacityExceeded, ProtocolViolation, RegionSizeError};
use crate::metrics;

/// Round `n` up to the next multiple of 4.
pub const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// One record shifted off the queue. `payload` points into the shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub op_id: OpId,
    pub payload: &'a [u8],
}

pub struct SharedQueue {
    words: Box<[u32]>,
}

/// A region of `RECOMMENDED_SIZE` bytes.
impl Default for SharedQueue {
    fn default() -> Self {
        Self::allocate(RECOMMENDED_SIZE)
    }
}

impl SharedQueue {
    /// Allocate a zeroed region of `byte_len` bytes (rounded down to whole words) and reset it.
    pub fn new(byte_len: usize) -> Result<Self, RegionSizeError> {
        if byte_len / 4 < INDEX_RECORDS {
            return Err(RegionSizeError::TooSmall {
                byte_len,
                header: HEAD_INIT,
            });
        }
        // Byte offsets are stored as u32 words.
        if byte_len > u32::MAX as usize {
            return Err(RegionSizeError::TooLarge { byte_len });
        }
        Ok(Self::allocate(byte_len))
    }

    fn allocate(byte_len: usize) -> Self {
        let mut queue = Self {
            words: vec![0u32; byte_len / 4].into_boxed_slice(),
        };
        queue.reset();
        queue
    }

    /// Adopt a region the host already populated. The header is validated, not reset.
    pub fn from_words(words: Box<[u32]>) -> Result<Self, ProtocolViolation> {
        if words.len() < INDEX_RECORDS {
            return Err(ProtocolViolation::CorruptHeader(format!(
                "region of {} words is smaller than the {INDEX_RECORDS}-word header",
                words.len()
            )));
        }
        let queue = Self { words };
        queue.check_counters()?;
        Ok(queue)
    }

    fn check_counters(&self) -> Result<(), ProtocolViolation> {
        let num_records = self.num_records();
        let shifted = self.num_shifted_off();
        let head = self.head();
        if num_records > MAX_RECORDS || shifted > num_records {
            return Err(ProtocolViolation::CorruptHeader(format!(
                "counters out of range: numRecords={num_records} numShiftedOff={shifted}"
            )));
        }
        if head % 4 != 0 || head < HEAD_INIT || head > self.byte_len() {
            return Err(ProtocolViolation::CorruptHeader(format!(
                "head {head} is misaligned or outside {HEAD_INIT}..={}",
                self.byte_len()
            )));
        }
        Ok(())
    }

    /// Total byte capacity of the region, header included.
    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }

    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    pub fn reset(&mut self) {
        self.words[INDEX_NUM_RECORDS] = 0;
        self.words[INDEX_NUM_SHIFTED_OFF] = 0;
        self.words[INDEX_HEAD] = HEAD_INIT as u32;
    }

    /// Next free payload byte offset.
    pub fn head(&self) -> usize {
        self.words[INDEX_HEAD] as usize
    }

    /// Records pushed since the last reset, shifted or not.
    pub fn num_records(&self) -> usize {
        self.words[INDEX_NUM_RECORDS] as usize
    }

    pub fn num_shifted_off(&self) -> usize {
        self.words[INDEX_NUM_SHIFTED_OFF] as usize
    }

    /// Live records still waiting to be shifted.
    pub fn size(&self) -> usize {
        self.num_records().saturating_sub(self.num_shifted_off())
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Op id of the oldest live record.
    pub fn front_op_id(&self) -> Option<OpId> {
        if self.is_empty() {
            return None;
        }
        let index = self.num_shifted_off();
        (index < MAX_RECORDS).then(|| self.meta(index).1)
    }

    fn set_meta(&mut self, index: usize, end: usize, op_id: OpId) {
        self.words[INDEX_OFFSETS + 2 * index] = end as u32;
        self.words[INDEX_OFFSETS + 2 * index + 1] = op_id;
    }

    /// (end byte offset, op id) of record `index`.
    fn meta(&self, index: usize) -> (usize, OpId) {
        (
            self.words[INDEX_OFFSETS + 2 * index] as usize,
            self.words[INDEX_OFFSETS + 2 * index + 1],
        )
    }

    /// Start byte offset of record `index`.
    fn offset(&self, index: usize) -> usize {
        if index == 0 {
            HEAD_INIT
        } else {
            let (prev_end, _) = self.meta(index - 1);
            align4(prev_end)
        }
    }

    /// Append a record. On failure nothing in the region changes.
    pub fn push(&mut self, op_id: OpId, payload: &[u8]) -> Result<(), CapacityExceeded> {
        let index = self.num_records();
        if index >= MAX_RECORDS {
            metrics::inc_push_rejected();
            return Err(CapacityExceeded::TooManyRecords { max: MAX_RECORDS });
        }
        let off = self.head();
        let end = off + payload.len();
        let aligned_end = align4(end);
        if aligned_end > self.byte_len() {
            metrics::inc_push_rejected();
            return Err(CapacityExceeded::OutOfSpace {
                needed: aligned_end,
                capacity: self.byte_len(),
            });
        }

        self.set_meta(index, end, op_id);
        self.bytes_mut()[off..end].copy_from_slice(payload);
        self.words[INDEX_NUM_RECORDS] += 1;
        self.words[INDEX_HEAD] = aligned_end as u32;
        metrics::inc_records_pushed();
        Ok(())
    }

    /// Remove the oldest live record. `Ok(None)` when the queue is empty.
    ///
    /// Shifting the last live record resets the header; the returned payload
    /// stays readable until the next mutation.
    pub fn shift(&mut self) -> Result<Option<Record<'_>>, ProtocolViolation> {
        let index = self.num_shifted_off();
        if self.size() == 0 {
            if index != 0 {
                return Err(ProtocolViolation::CorruptHeader(format!(
                    "empty queue with numShiftedOff={index}"
                )));
            }
            return Ok(None);
        }

        let start = self.offset(index);
        let (end, op_id) = self.meta(index);
        if start % 4 != 0 || end < start || end > self.byte_len() {
            return Err(ProtocolViolation::CorruptHeader(format!(
                "record {index} spans {start}..{end} in a {}-byte region",
                self.byte_len()
            )));
        }

        if self.size() > 1 {
            self.words[INDEX_NUM_SHIFTED_OFF] += 1;
        } else {
            self.reset();
        }

        Ok(Some(Record {
            op_id,
            payload: &self.bytes()[start..end],
        }))
    }
}

impl std::fmt::Debug for SharedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedQueue")
            .field("byte_len", &self.byte_len())
            .field("num_records", &self.num_records())
            .field("num_shifted_off", &self.num_shifted_off())
            .field("head", &self.head())
            .finish()
    }
}
