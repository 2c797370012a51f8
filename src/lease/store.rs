//! Keyed cache of values, each guarded by its own lease.

use super::state_machine::{
    LeaseContext, LeaseGrant, LeaseStateKind, LeaseStateMachine, UpdateDecision,
};
use super::timer::{TimerEvent, TimerScheduler};
use crate::core::error::{CacheError, CacheResult, OpResult};
use crate::core::time::Timestamp;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache key.
pub type CacheId = u32;

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome<V> {
    pub result: OpResult,
    pub expire: Timestamp,
    /// Current value; `None` when the key has never been written.
    pub value: Option<V>,
}

/// A deferred write that has just been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredCompletion {
    pub cache_id: CacheId,
    /// Operation that staged the write.
    pub op_id: u64,
    pub result: OpResult,
    pub expire: Timestamp,
}

/// Entry counts per lease state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub idle: usize,
    pub guaranteed: usize,
    pub protected: usize,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    lease: LeaseStateMachine<V>,
}

/// Map from cache id to value plus lease.
///
/// Entries are created by the first update to a key and never removed.
pub struct CacheStore<V> {
    entries: HashMap<CacheId, CacheEntry<V>>,
    timers: Arc<TimerScheduler<TimerEvent>>,
    lease_ms: u64,
}

impl<V: Clone + Default> CacheStore<V> {
    /// Create an empty store arming lease timers on `timers`.
    pub fn new(timers: Arc<TimerScheduler<TimerEvent>>, lease_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            timers,
            lease_ms,
        }
    }

    /// Guarantee window granted by reads and writes.
    pub fn lease_ms(&self) -> u64 {
        self.lease_ms
    }

    /// Read a key.
    ///
    /// An unknown key yields `ErrorNoData` with a zero expiry and creates no
    /// entry.
    pub fn read_op(&mut self, cache_id: CacheId, op_id: u64) -> CacheResult<ReadOutcome<V>> {
        let Some(entry) = self.entries.get_mut(&cache_id) else {
            return Ok(ReadOutcome {
                result: OpResult::ErrorNoData,
                expire: Timestamp::zero(),
                value: None,
            });
        };

        let ctx = LeaseContext {
            timers: &self.timers,
            cache_id,
            lease_ms: self.lease_ms,
        };
        let grant = entry.lease.read_op(op_id, &ctx)?;
        Ok(ReadOutcome {
            result: grant.result,
            expire: grant.expire,
            value: Some(entry.value.clone()),
        })
    }

    /// Write a key, creating it when absent.
    ///
    /// Returns `Ok` when the value was applied, `Defer` when it was staged
    /// behind a live lease and `Retry` when another write is already staged.
    pub fn update_op(&mut self, cache_id: CacheId, value: V, op_id: u64) -> CacheResult<LeaseGrant> {
        let entry = self.entries.entry(cache_id).or_insert_with(|| CacheEntry {
            value: V::default(),
            lease: LeaseStateMachine::new(),
        });

        let ctx = LeaseContext {
            timers: &self.timers,
            cache_id,
            lease_ms: self.lease_ms,
        };
        let decision = entry.lease.update_op(op_id, value, &ctx)?;
        let grant = decision.grant();
        if let UpdateDecision::Commit { value, .. } = decision {
            entry.value = value;
        }

        tracing::debug!(
            cache_id,
            op_id,
            result = %grant.result,
            expire = %grant.expire,
            "update handled"
        );
        Ok(grant)
    }

    /// Route a lease timer event to its entry.
    ///
    /// Returns the completion of a staged write when one was committed.
    /// An unknown `cache_id` is an invariant violation.
    pub fn on_lease_expired(&mut self, cache_id: CacheId) -> CacheResult<Option<DeferredCompletion>> {
        let entry = self.entries.get_mut(&cache_id).ok_or_else(|| {
            CacheError::sys_routine(format!("lease timer fired for unknown entry {cache_id}"))
        })?;

        let ctx = LeaseContext {
            timers: &self.timers,
            cache_id,
            lease_ms: self.lease_ms,
        };
        let Some(completion) = entry.lease.on_expired(&ctx)? else {
            return Ok(None);
        };

        entry.value = completion.value;
        tracing::debug!(
            cache_id,
            op_id = completion.op_id,
            expire = %completion.expire,
            "deferred update committed"
        );
        Ok(Some(DeferredCompletion {
            cache_id,
            op_id: completion.op_id,
            result: OpResult::Ok,
            expire: completion.expire,
        }))
    }

    /// Seed a key without granting a lease.
    ///
    /// Only absent or idle entries can be seeded.
    pub fn preload(&mut self, cache_id: CacheId, value: V) -> CacheResult<()> {
        match self.entries.get_mut(&cache_id) {
            None => {
                self.entries.insert(
                    cache_id,
                    CacheEntry {
                        value,
                        lease: LeaseStateMachine::new(),
                    },
                );
                Ok(())
            }
            Some(entry) if entry.lease.state_kind() == LeaseStateKind::Idle => {
                entry.value = value;
                Ok(())
            }
            Some(entry) => Err(CacheError::illegal_argument(format!(
                "cannot preload entry {cache_id} while {}",
                entry.lease.state_kind()
            ))),
        }
    }

    /// Current value without touching the lease.
    pub fn peek(&self, cache_id: CacheId) -> Option<&V> {
        self.entries.get(&cache_id).map(|entry| &entry.value)
    }

    /// Lease state of a key.
    pub fn state_of(&self, cache_id: CacheId) -> Option<LeaseStateKind> {
        self.entries
            .get(&cache_id)
            .map(|entry| entry.lease.state_kind())
    }

    /// Lease expiry of a key (zero when idle).
    pub fn lease_expiry_of(&self, cache_id: CacheId) -> Option<Timestamp> {
        self.entries
            .get(&cache_id)
            .map(|entry| entry.lease.lease_expiry())
    }

    pub fn contains(&self, cache_id: CacheId) -> bool {
        self.entries.contains_key(&cache_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry counts per lease state.
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            entries: self.entries.len(),
            ..StoreStats::default()
        };
        for entry in self.entries.values() {
            match entry.lease.state_kind() {
                LeaseStateKind::Idle => stats.idle += 1,
                LeaseStateKind::Guaranteed => stats.guaranteed += 1,
                LeaseStateKind::Protected => stats.protected += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{Clock, ManualClock};

    const T: u64 = 10_000;

    fn store() -> (Arc<ManualClock>, Arc<TimerScheduler>, CacheStore<String>) {
        let clock = Arc::new(ManualClock::new(5_000));
        let timers = Arc::new(TimerScheduler::new(clock.clone() as Arc<dyn Clock>));
        let store = CacheStore::new(Arc::clone(&timers), T);
        (clock, timers, store)
    }

    fn drain(timers: &TimerScheduler, store: &mut CacheStore<String>) -> Vec<DeferredCompletion> {
        let mut due = Vec::new();
        timers.tick(|event| due.push(event));
        let mut done = Vec::new();
        for event in due {
            if let TimerEvent::LeaseExpired { cache_id } = event {
                if let Some(c) = store.on_lease_expired(cache_id).unwrap() {
                    done.push(c);
                }
            }
        }
        done
    }

    #[test]
    fn test_read_unknown_key() {
        let (_clock, timers, mut store) = store();
        let outcome = store.read_op(42, 1).unwrap();
        assert_eq!(
            outcome,
            ReadOutcome {
                result: OpResult::ErrorNoData,
                expire: Timestamp::zero(),
                value: None,
            }
        );
        assert!(!store.contains(42));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_update_then_read() {
        let (clock, _timers, mut store) = store();
        let grant = store.update_op(1, "A".to_string(), 10).unwrap();
        assert_eq!(grant.result, OpResult::Ok);
        assert_eq!(grant.expire, clock.now().add_ms(T));

        let outcome = store.read_op(1, 11).unwrap();
        assert_eq!(outcome.result, OpResult::Ok);
        assert_eq!(outcome.value.as_deref(), Some("A"));
    }

    #[test]
    fn test_deferred_update_commits_on_expiry() {
        let (clock, timers, mut store) = store();
        store.update_op(1, "A".to_string(), 10).unwrap();
        let first = store.lease_expiry_of(1).unwrap();

        clock.advance(1_000);
        let grant = store.update_op(1, "B".to_string(), 11).unwrap();
        assert_eq!(grant, LeaseGrant { result: OpResult::Defer, expire: first });
        assert_eq!(store.peek(1).map(String::as_str), Some("A"));

        clock.set(first.ms);
        let done = drain(&timers, &mut store);
        assert_eq!(
            done,
            vec![DeferredCompletion {
                cache_id: 1,
                op_id: 11,
                result: OpResult::Ok,
                expire: first.add_ms(T),
            }]
        );
        assert_eq!(store.peek(1).map(String::as_str), Some("B"));
        assert_eq!(store.state_of(1), Some(LeaseStateKind::Guaranteed));
    }

    #[test]
    fn test_expiry_for_unknown_entry() {
        let (_clock, _timers, mut store) = store();
        let err = store.on_lease_expired(9).unwrap_err();
        assert!(matches!(err, CacheError::SysRoutine { .. }));
    }

    #[test]
    fn test_zero_op_id_update_on_leased_entry() {
        let (_clock, _timers, mut store) = store();
        store.update_op(1, "a".to_string(), 9).unwrap();

        let err = store.update_op(1, "b".to_string(), 0).unwrap_err();
        assert!(matches!(err, CacheError::IllegalArgument { .. }));
        assert_eq!(err.to_op_result(), Some(OpResult::ErrorArgument));
        assert_eq!(store.peek(1).map(String::as_str), Some("a"));
        assert_eq!(store.state_of(1), Some(LeaseStateKind::Guaranteed));
    }

    #[test]
    fn test_preload() {
        let (_clock, timers, mut store) = store();
        store.preload(3, "seed".to_string()).unwrap();
        assert_eq!(store.state_of(3), Some(LeaseStateKind::Idle));
        assert!(timers.is_empty());

        store.read_op(3, 1).unwrap();
        assert!(store.preload(3, "again".to_string()).is_err());
    }

    #[test]
    fn test_stats() {
        let (_clock, _timers, mut store) = store();
        store.preload(1, "a".to_string()).unwrap();
        store.update_op(2, "b".to_string(), 1).unwrap();
        store.update_op(3, "c".to_string(), 2).unwrap();
        store.update_op(3, "d".to_string(), 3).unwrap();

        assert_eq!(
            store.stats(),
            StoreStats {
                entries: 3,
                idle: 1,
                guaranteed: 1,
                protected: 1,
            }
        );
    }
}
