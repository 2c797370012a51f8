//! Snowflake-style operation id generator.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! | 1 unused | 41 ms since EPOCH_MS | 5 datacenter | 5 worker | 12 sequence |
//! ```

use crate::core::error::{CacheError, CacheResult};
use crate::core::time::{Clock, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;

/// Custom epoch (2020-01-01T00:00:00Z).
pub const EPOCH_MS: u64 = 1_577_836_800_000;

const SEQUENCE_BITS: u32 = 12;
const WORKER_BITS: u32 = 5;
const DATACENTER_BITS: u32 = 5;

const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
/// Largest datacenter or worker id.
pub const MAX_NODE_ID: u8 = (1 << WORKER_BITS) - 1;

const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS + DATACENTER_BITS;
const TIMESTAMP_MASK: u64 = (1 << 41) - 1;

#[derive(Debug)]
struct IdState {
    last_ms: u64,
    sequence: u64,
}

/// Generates non-zero, strictly increasing 64-bit ids.
pub struct IdGenerator {
    clock: Arc<dyn Clock>,
    node_bits: u64,
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Create a generator for the given node.
    ///
    /// Both ids must be in `0..=31`.
    pub fn new(clock: Arc<dyn Clock>, datacenter_id: u8, worker_id: u8) -> CacheResult<Self> {
        if datacenter_id > MAX_NODE_ID || worker_id > MAX_NODE_ID {
            return Err(CacheError::illegal_argument(format!(
                "datacenter_id and worker_id must be <= {}, got {} and {}",
                MAX_NODE_ID, datacenter_id, worker_id
            )));
        }
        let node_bits = (u64::from(datacenter_id) << DATACENTER_SHIFT)
            | (u64::from(worker_id) << WORKER_SHIFT);
        Ok(Self {
            clock,
            node_bits,
            state: Mutex::new(IdState {
                last_ms: 0,
                sequence: 0,
            }),
        })
    }

    /// Next id.
    ///
    /// When the sequence is exhausted within a millisecond, or the clock
    /// steps backwards, the generator borrows from the next millisecond
    /// instead of waiting.
    pub fn next_id(&self) -> u64 {
        let now_ms = elapsed_since_epoch(self.clock.now());
        let mut state = self.state.lock();

        if now_ms > state.last_ms {
            state.last_ms = now_ms;
            state.sequence = 0;
        } else if state.sequence < MAX_SEQUENCE {
            state.sequence += 1;
        } else {
            state.last_ms += 1;
            state.sequence = 0;
        }

        // last_ms starts at 0, so an id minted at the epoch itself takes
        // sequence 1 and is never zero
        ((state.last_ms & TIMESTAMP_MASK) << TIMESTAMP_SHIFT) | self.node_bits | state.sequence
    }
}

fn elapsed_since_epoch(now: Timestamp) -> u64 {
    now.ms.saturating_sub(EPOCH_MS)
}

/// Split an id into `(ms since EPOCH_MS, datacenter, worker, sequence)`.
pub fn decompose(id: u64) -> (u64, u8, u8, u16) {
    let ms = id >> TIMESTAMP_SHIFT;
    let datacenter = ((id >> DATACENTER_SHIFT) & u64::from(MAX_NODE_ID)) as u8;
    let worker = ((id >> WORKER_SHIFT) & u64::from(MAX_NODE_ID)) as u8;
    let sequence = (id & MAX_SEQUENCE) as u16;
    (ms, datacenter, worker, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;

    fn generator(start_ms: u64) -> (Arc<ManualClock>, IdGenerator) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let ids = IdGenerator::new(clock.clone() as Arc<dyn Clock>, 3, 7).unwrap();
        (clock, ids)
    }

    #[test]
    fn test_layout() {
        let (_clock, ids) = generator(EPOCH_MS + 1_000);
        let id = ids.next_id();
        assert_eq!(decompose(id), (1_000, 3, 7, 0));
        assert_eq!(decompose(ids.next_id()), (1_000, 3, 7, 1));
    }

    #[test]
    fn test_strictly_increasing() {
        let (clock, ids) = generator(EPOCH_MS + 5);
        let mut last = 0;
        for i in 0..10_000 {
            if i % 1_000 == 0 {
                clock.advance(1);
            }
            let id = ids.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_clock_step_back() {
        let (clock, ids) = generator(EPOCH_MS + 500);
        let before = ids.next_id();
        clock.set(EPOCH_MS + 100);
        assert!(ids.next_id() > before);
    }

    #[test]
    fn test_never_zero_at_epoch() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let ids = IdGenerator::new(clock, 0, 0).unwrap();
        assert_ne!(ids.next_id(), 0);
    }

    #[test]
    fn test_node_id_range() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(EPOCH_MS));
        assert!(IdGenerator::new(clock.clone(), 32, 0).is_err());
        assert!(IdGenerator::new(clock, 0, 31).is_ok());
    }
}
