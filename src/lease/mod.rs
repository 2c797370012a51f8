//! Lease-guarded cache core: timers, the per-entry lease automaton and the
//! keyed store built on top of them.

pub mod state_machine;
pub mod store;
pub mod timer;

pub use state_machine::{
    Completion, LeaseContext, LeaseGrant, LeaseState, LeaseStateKind, LeaseStateMachine,
    PendingWrite, UpdateDecision, DEFAULT_LEASE_MS,
};
pub use store::{CacheId, CacheStore, DeferredCompletion, ReadOutcome, StoreStats};
pub use timer::{TimerEvent, TimerId, TimerScheduler, TimerStats};
