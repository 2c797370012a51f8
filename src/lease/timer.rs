//! Min-heap timer scheduler.
//!
//! Timers carry an event value rather than a closure: when a timer comes due,
//! [`TimerScheduler::tick`] hands its event to the caller, which routes it
//! through the normal dispatch path. This keeps state transitions on the
//! reactor thread and avoids captured back-references into the cache.
//!
//! Cancellation is lazy: [`TimerScheduler::cancel`] zeroes the remaining
//! repeat count and the heap slot is reclaimed the next time `tick` pops it.

use crate::core::error::{CacheError, CacheResult};
use crate::core::time::{Clock, Timestamp};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// Events scheduled by the lease server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// The lease window of a cache entry has elapsed.
    LeaseExpired { cache_id: u32 },
    /// No Ack arrived for a response within the retransmit window.
    AckTimeout { op_id: u64 },
}

/// Handle returned by [`TimerScheduler::add_timer`].
///
/// Ids are never reused and remain valid for cancellation after the timer
/// has fired or been evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Heap slot ordered by expiry (earliest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapSlot {
    expiry: Timestamp,
    id: TimerId,
}

impl Ord for HeapSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .expiry
            .cmp(&self.expiry)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for HeapSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct TimerEntry<E> {
    event: E,
    timeout_ms: u64,
    expiry: Timestamp,
    remaining: u32,
}

#[derive(Debug)]
struct TimerHeap<E> {
    heap: BinaryHeap<HeapSlot>,
    timers: HashMap<TimerId, TimerEntry<E>>,
    next_id: u64,
    stats: TimerStats,
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Timers registered.
    pub armed: u64,
    /// Cancellations that hit a live timer.
    pub cancelled: u64,
    /// Events handed out by `tick`.
    pub fired: u64,
}

/// Thread-safe one-shot/repeating timer facility.
pub struct TimerScheduler<E = TimerEvent> {
    clock: Arc<dyn Clock>,
    inner: Mutex<TimerHeap<E>>,
}

impl<E: Clone> TimerScheduler<E> {
    /// Create a scheduler reading time from the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(TimerHeap {
                heap: BinaryHeap::new(),
                timers: HashMap::new(),
                next_id: 1,
                stats: TimerStats::default(),
            }),
        }
    }

    /// Current time according to the scheduler's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Arm a timer firing `event` after `timeout_ms`, `repeat` times.
    ///
    /// Fails with `IllegalArgument` if `repeat` is zero.
    pub fn add_timer(&self, event: E, timeout_ms: u64, repeat: u32) -> CacheResult<TimerId> {
        if repeat == 0 {
            return Err(CacheError::illegal_argument("timer repeat count must be >= 1"));
        }

        let expiry = self.now().add_ms(timeout_ms);
        let mut inner = self.inner.lock();
        let id = TimerId(inner.next_id);
        inner.next_id += 1;
        inner.timers.insert(
            id,
            TimerEntry {
                event,
                timeout_ms,
                expiry,
                remaining: repeat,
            },
        );
        inner.heap.push(HeapSlot { expiry, id });
        inner.stats.armed += 1;
        Ok(id)
    }

    /// Cancel a timer. Idempotent; unknown ids are ignored.
    pub fn cancel(&self, id: TimerId) {
        let mut inner = self.inner.lock();
        let hit = match inner.timers.get_mut(&id) {
            Some(entry) if entry.remaining > 0 => {
                entry.remaining = 0;
                true
            }
            _ => false,
        };
        if hit {
            inner.stats.cancelled += 1;
        }
    }

    /// Fire every timer whose expiry is at or before now.
    ///
    /// Events are handed to `on_fire` in non-decreasing expiry order. The lock
    /// is released while `on_fire` runs, so it may add or cancel timers; a
    /// timer cancelled from inside `on_fire` does not fire later in the same
    /// pass. A repeating timer fires at most once per call.
    ///
    /// Returns the number of events fired.
    pub fn tick<F>(&self, mut on_fire: F) -> usize
    where
        F: FnMut(E),
    {
        let now = self.now();
        let mut rearm = Vec::new();
        let mut fired = 0;

        loop {
            let event = {
                let mut inner = self.inner.lock();
                match inner.pop_due(now, &mut rearm) {
                    Some(event) => event,
                    None => break,
                }
            };
            fired += 1;
            on_fire(event);
        }

        if !rearm.is_empty() {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            for id in rearm {
                let cancelled = match inner.timers.get_mut(&id) {
                    Some(entry) if entry.remaining > 0 => {
                        entry.expiry = now.add_ms(entry.timeout_ms);
                        inner.heap.push(HeapSlot {
                            expiry: entry.expiry,
                            id,
                        });
                        false
                    }
                    // Cancelled while its event was being handled
                    Some(_) => true,
                    None => false,
                };
                if cancelled {
                    inner.timers.remove(&id);
                }
            }
        }

        fired
    }

    /// Number of live (uncancelled) timers.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .timers
            .values()
            .filter(|entry| entry.remaining > 0)
            .count()
    }

    /// Check whether no live timers remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the timer is still armed.
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.inner
            .lock()
            .timers
            .get(&id)
            .is_some_and(|entry| entry.remaining > 0)
    }

    /// Heap slots still held, including lazily cancelled ones.
    pub fn heap_len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Earliest expiry among live timers.
    pub fn next_expiry(&self) -> Option<Timestamp> {
        self.inner
            .lock()
            .timers
            .values()
            .filter(|entry| entry.remaining > 0)
            .map(|entry| entry.expiry)
            .min()
    }

    /// Scheduler counters.
    pub fn stats(&self) -> TimerStats {
        self.inner.lock().stats
    }
}

impl<E: Clone> TimerHeap<E> {
    /// Pop the next due timer that still has repeats left.
    ///
    /// Cancelled slots are evicted on the way. Timers with repeats remaining
    /// after firing are pushed onto `rearm` rather than back onto the heap.
    fn pop_due(&mut self, now: Timestamp, rearm: &mut Vec<TimerId>) -> Option<E> {
        while let Some(slot) = self.heap.peek().copied() {
            if slot.expiry > now {
                return None;
            }
            self.heap.pop();

            let Some(entry) = self.timers.get_mut(&slot.id) else {
                continue;
            };
            if entry.remaining == 0 {
                self.timers.remove(&slot.id);
                continue;
            }

            entry.remaining -= 1;
            let event = entry.event.clone();
            if entry.remaining == 0 {
                self.timers.remove(&slot.id);
            } else {
                rearm.push(slot.id);
            }
            self.stats.fired += 1;
            return Some(event);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;

    fn scheduler() -> (Arc<ManualClock>, TimerScheduler<u32>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let timers = TimerScheduler::new(clock.clone() as Arc<dyn Clock>);
        (clock, timers)
    }

    #[test]
    fn test_zero_repeat_rejected() {
        let (_clock, timers) = scheduler();
        let err = timers.add_timer(1, 10, 0).unwrap_err();
        assert!(matches!(err, CacheError::IllegalArgument { .. }));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_fires_in_expiry_order() {
        let (clock, timers) = scheduler();
        timers.add_timer(3, 30, 1).unwrap();
        timers.add_timer(1, 10, 1).unwrap();
        timers.add_timer(2, 20, 1).unwrap();

        clock.advance(15);
        let mut fired = Vec::new();
        assert_eq!(timers.tick(|e| fired.push(e)), 1);
        assert_eq!(fired, vec![1]);

        clock.advance(100);
        timers.tick(|e| fired.push(e));
        assert_eq!(fired, vec![1, 2, 3]);
        assert!(timers.is_empty());
        assert_eq!(timers.heap_len(), 0);
    }

    #[test]
    fn test_not_due_does_not_fire() {
        let (clock, timers) = scheduler();
        timers.add_timer(7, 50, 1).unwrap();
        clock.advance(49);
        assert_eq!(timers.tick(|_| panic!("fired early")), 0);
        clock.advance(1);
        assert_eq!(timers.tick(|_| {}), 1);
    }

    #[test]
    fn test_cancel_is_lazy_and_idempotent() {
        let (clock, timers) = scheduler();
        let id = timers.add_timer(1, 10, 1).unwrap();
        timers.cancel(id);
        timers.cancel(id);
        timers.cancel(TimerId(999));

        assert!(!timers.is_armed(id));
        assert_eq!(timers.len(), 0);
        // Slot stays until the next pass reaches it
        assert_eq!(timers.heap_len(), 1);

        clock.advance(10);
        assert_eq!(timers.tick(|_| panic!("cancelled timer fired")), 0);
        assert_eq!(timers.heap_len(), 0);
        assert_eq!(timers.stats().cancelled, 1);
    }

    #[test]
    fn test_repeating_timer() {
        let (clock, timers) = scheduler();
        let id = timers.add_timer(5, 10, 3).unwrap();

        let mut count = 0;
        for _ in 0..3 {
            clock.advance(10);
            count += timers.tick(|e| assert_eq!(e, 5));
        }
        assert_eq!(count, 3);
        assert!(!timers.is_armed(id));

        clock.advance(10);
        assert_eq!(timers.tick(|_| {}), 0);
    }

    #[test]
    fn test_repeating_timer_fires_once_per_pass() {
        let (clock, timers) = scheduler();
        timers.add_timer(5, 0, 4).unwrap();
        clock.advance(1);
        assert_eq!(timers.tick(|_| {}), 1);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_cancel_from_inside_tick() {
        let (clock, timers) = scheduler();
        timers.add_timer(1, 10, 1).unwrap();
        let second = timers.add_timer(2, 20, 1).unwrap();

        clock.advance(30);
        let mut fired = Vec::new();
        timers.tick(|e| {
            fired.push(e);
            if e == 1 {
                timers.cancel(second);
            }
        });
        assert_eq!(fired, vec![1]);
    }

    #[test]
    fn test_add_from_inside_tick() {
        let (clock, timers) = scheduler();
        timers.add_timer(1, 10, 1).unwrap();

        clock.advance(10);
        timers.tick(|_| {
            timers.add_timer(2, 100, 1).unwrap();
        });
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_expiry(), Some(Timestamp::new(1_110)));
    }

    #[test]
    fn test_cross_thread_cancel() {
        let clock = Arc::new(ManualClock::new(0));
        let timers = Arc::new(TimerScheduler::<u32>::new(clock.clone() as Arc<dyn Clock>));
        let id = timers.add_timer(1, 10, 1).unwrap();

        let remote = Arc::clone(&timers);
        std::thread::spawn(move || remote.cancel(id))
            .join()
            .unwrap();

        clock.advance(10);
        assert_eq!(timers.tick(|_| {}), 0);
    }
}
