//! Per-entry lease automaton.
//!
//! Each cache entry moves through three states:
//!
//! ```text
//!            read/update                 update (stage write)
//!   Idle ─────────────────► Guaranteed ─────────────────────► Protected
//!    ▲                        │   ▲                              │
//!    └──── lease timer ───────┘   └──── lease timer: commit ─────┘
//!                                        staged write, complete
//! ```
//!
//! - **Idle**: no reader holds a lease. Reads and writes succeed immediately
//!   and start a fresh guarantee window of `lease_ms`.
//! - **Guaranteed**: some reader was promised the value stays stable until the
//!   lease expiry. Reads extend the window; a write is staged and deferred.
//! - **Protected**: a write is staged. Reads still see the old value but are
//!   told it is not protected (expiry = now). Further writes must retry.
//!
//! The entry owns at most one live timer; arming a new one always cancels
//! the previous handle first.

use super::timer::{TimerEvent, TimerId, TimerScheduler};
use crate::core::error::{CacheError, CacheResult, OpResult};
use crate::core::time::Timestamp;

/// Default guarantee window in milliseconds.
pub const DEFAULT_LEASE_MS: u64 = 10_000;

/// A write waiting for the current lease to lapse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite<V> {
    /// Operation that staged the write.
    pub op_id: u64,
    /// Value to commit.
    pub value: V,
}

/// Lease state. Only `Protected` carries a staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState<V> {
    Idle,
    Guaranteed,
    Protected(PendingWrite<V>),
}

/// Payload-free view of [`LeaseState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseStateKind {
    Idle,
    Guaranteed,
    Protected,
}

impl std::fmt::Display for LeaseStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Guaranteed => write!(f, "guaranteed"),
            Self::Protected => write!(f, "protected"),
        }
    }
}

/// What a transition needs from its surroundings.
#[derive(Clone, Copy)]
pub struct LeaseContext<'a> {
    /// Scheduler used to arm expiry timers.
    pub timers: &'a TimerScheduler<TimerEvent>,
    /// Key the expiry events are tagged with.
    pub cache_id: u32,
    /// Guarantee window.
    pub lease_ms: u64,
}

/// Result code and expiry returned to the caller of a lease operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    pub result: OpResult,
    pub expire: Timestamp,
}

impl LeaseGrant {
    fn new(result: OpResult, expire: Timestamp) -> Self {
        Self { result, expire }
    }
}

/// How an update was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision<V> {
    /// Apply `value` now.
    Commit { value: V, expire: Timestamp },
    /// The value was staged; a [`Completion`] follows when the lease lapses.
    Deferred { expire: Timestamp },
    /// Another write is already staged. The value was dropped.
    Retry { expire: Timestamp },
}

impl<V> UpdateDecision<V> {
    /// Result code and expiry for the response.
    pub fn grant(&self) -> LeaseGrant {
        match self {
            Self::Commit { expire, .. } => LeaseGrant::new(OpResult::Ok, *expire),
            Self::Deferred { expire } => LeaseGrant::new(OpResult::Defer, *expire),
            Self::Retry { expire } => LeaseGrant::new(OpResult::Retry, *expire),
        }
    }
}

/// A staged write that has just been committed by the lease timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion<V> {
    /// Operation that staged the write.
    pub op_id: u64,
    /// Value to commit.
    pub value: V,
    /// Expiry of the fresh guarantee window covering the new value.
    pub expire: Timestamp,
}

/// Lease automaton for a single cache entry.
#[derive(Debug)]
pub struct LeaseStateMachine<V> {
    state: LeaseState<V>,
    lease_expiry: Timestamp,
    timer: Option<TimerId>,
    last_op_id: u64,
}

impl<V> LeaseStateMachine<V> {
    /// Create an idle lease.
    pub fn new() -> Self {
        Self {
            state: LeaseState::Idle,
            lease_expiry: Timestamp::zero(),
            timer: None,
            last_op_id: 0,
        }
    }

    /// Current state without its payload.
    pub fn state_kind(&self) -> LeaseStateKind {
        match self.state {
            LeaseState::Idle => LeaseStateKind::Idle,
            LeaseState::Guaranteed => LeaseStateKind::Guaranteed,
            LeaseState::Protected(_) => LeaseStateKind::Protected,
        }
    }

    /// Current state.
    pub fn state(&self) -> &LeaseState<V> {
        &self.state
    }

    /// Expiry of the current lease (zero when idle).
    pub fn lease_expiry(&self) -> Timestamp {
        self.lease_expiry
    }

    /// Operation id of the staged write, if any.
    pub fn pending_op_id(&self) -> Option<u64> {
        match &self.state {
            LeaseState::Protected(pending) => Some(pending.op_id),
            _ => None,
        }
    }

    /// Handle of the armed expiry timer.
    pub fn timer_id(&self) -> Option<TimerId> {
        self.timer
    }

    /// Last operation granted a lease.
    pub fn last_op_id(&self) -> u64 {
        self.last_op_id
    }

    /// Serve a read.
    ///
    /// Idle and Guaranteed grant a fresh window. Protected answers with an
    /// expiry of now: the caller gets the current value but no guarantee.
    pub fn read_op(&mut self, op_id: u64, ctx: &LeaseContext<'_>) -> CacheResult<LeaseGrant> {
        self.lapse_if_elapsed(ctx);

        match self.state_kind() {
            LeaseStateKind::Idle | LeaseStateKind::Guaranteed => {
                self.last_op_id = op_id;
                self.enter_guaranteed(ctx)?;
                Ok(LeaseGrant::new(OpResult::Ok, self.lease_expiry))
            }
            LeaseStateKind::Protected => Ok(LeaseGrant::new(OpResult::Ok, ctx.timers.now())),
        }
    }

    /// Serve a write.
    ///
    /// Fails with `IllegalArgument` when `op_id` is zero and the entry is
    /// leased, since a staged write must be addressable by its completion.
    pub fn update_op(
        &mut self,
        op_id: u64,
        value: V,
        ctx: &LeaseContext<'_>,
    ) -> CacheResult<UpdateDecision<V>> {
        self.lapse_if_elapsed(ctx);

        match self.state_kind() {
            LeaseStateKind::Idle => {
                self.last_op_id = op_id;
                self.enter_guaranteed(ctx)?;
                Ok(UpdateDecision::Commit {
                    value,
                    expire: self.lease_expiry,
                })
            }
            LeaseStateKind::Guaranteed => {
                if op_id == 0 {
                    return Err(CacheError::illegal_argument(
                        "update on a guaranteed entry requires a non-zero op_id",
                    ));
                }
                self.enter_protected(PendingWrite { op_id, value }, ctx)?;
                Ok(UpdateDecision::Deferred {
                    expire: self.lease_expiry,
                })
            }
            LeaseStateKind::Protected => {
                if op_id == 0 {
                    return Err(CacheError::illegal_argument(
                        "update on a protected entry requires a non-zero op_id",
                    ));
                }
                Ok(UpdateDecision::Retry {
                    expire: self.lease_expiry,
                })
            }
        }
    }

    /// Handle the entry's lease timer firing.
    ///
    /// Guaranteed falls back to Idle. Protected commits its staged write,
    /// re-enters Guaranteed and returns the completion for the staging
    /// operation.
    pub fn on_expired(&mut self, ctx: &LeaseContext<'_>) -> CacheResult<Option<Completion<V>>> {
        // The handle belongs to the timer that just fired
        self.timer = None;

        match std::mem::replace(&mut self.state, LeaseState::Idle) {
            LeaseState::Idle => Err(CacheError::sys_routine(format!(
                "lease timer fired for idle entry {}",
                ctx.cache_id
            ))),
            LeaseState::Guaranteed => {
                self.enter_idle(ctx);
                Ok(None)
            }
            LeaseState::Protected(pending) => {
                self.enter_guaranteed(ctx)?;
                Ok(Some(Completion {
                    op_id: pending.op_id,
                    value: pending.value,
                    expire: self.lease_expiry,
                }))
            }
        }
    }

    /// Drop a Guaranteed lease whose window has passed but whose timer has
    /// not been ticked yet.
    fn lapse_if_elapsed(&mut self, ctx: &LeaseContext<'_>) {
        if matches!(self.state, LeaseState::Guaranteed)
            && ctx.timers.now().is_at_or_after(self.lease_expiry)
        {
            self.enter_idle(ctx);
        }
    }

    fn enter_idle(&mut self, ctx: &LeaseContext<'_>) {
        self.stop_expire(ctx);
        self.lease_expiry = Timestamp::zero();
        self.state = LeaseState::Idle;
    }

    fn enter_guaranteed(&mut self, ctx: &LeaseContext<'_>) -> CacheResult<()> {
        self.start_expire(ctx, ctx.lease_ms)?;
        self.state = LeaseState::Guaranteed;
        Ok(())
    }

    fn enter_protected(
        &mut self,
        pending: PendingWrite<V>,
        ctx: &LeaseContext<'_>,
    ) -> CacheResult<()> {
        let remaining = ctx.timers.now().ms_until(self.lease_expiry);
        if remaining == 0 {
            return Err(CacheError::sys_routine(format!(
                "lease of entry {} already elapsed when staging op {}",
                ctx.cache_id, pending.op_id
            )));
        }
        self.start_expire(ctx, remaining)?;
        self.state = LeaseState::Protected(pending);
        Ok(())
    }

    fn start_expire(&mut self, ctx: &LeaseContext<'_>, timeout_ms: u64) -> CacheResult<()> {
        self.stop_expire(ctx);
        self.lease_expiry = ctx.timers.now().add_ms(timeout_ms);
        let event = TimerEvent::LeaseExpired {
            cache_id: ctx.cache_id,
        };
        self.timer = Some(ctx.timers.add_timer(event, timeout_ms, 1)?);
        Ok(())
    }

    fn stop_expire(&mut self, ctx: &LeaseContext<'_>) {
        if let Some(id) = self.timer.take() {
            ctx.timers.cancel(id);
        }
    }
}

impl<V> Default for LeaseStateMachine<V> {
    fn default() -> Self {
        Self::new()
    }
}
