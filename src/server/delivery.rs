//! At-least-once delivery of responses.
//!
//! Every response sent by the dispatcher is registered here with a one-shot
//! ack timer. An Ack from the client unregisters it; otherwise the timer
//! hands the response back for exactly one retransmission and the record is
//! dropped whether or not that resend is acknowledged.

use crate::core::error::{CacheError, CacheResult};
use crate::lease::timer::{TimerEvent, TimerId, TimerScheduler};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Default retransmit window in milliseconds.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 500;

/// A response awaiting its Ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResponse {
    pub op_id: u64,
    pub peer: SocketAddr,
    /// Encoded datagram, resent unmodified.
    pub message: Bytes,
    pub timer: TimerId,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Responses currently awaiting an Ack.
    pub pending: usize,
    /// Responses registered since startup.
    pub registered: u64,
    /// Acks that matched a pending response.
    pub acknowledged: u64,
    /// Responses handed back for retransmission.
    pub retransmitted: u64,
}

/// Tracks outbound responses until they are acknowledged or retransmitted.
pub struct DeliveryManager {
    pending: HashMap<u64, PendingResponse>,
    timers: Arc<TimerScheduler<TimerEvent>>,
    ack_timeout_ms: u64,
    stats: DeliveryStats,
}

impl DeliveryManager {
    pub fn new(timers: Arc<TimerScheduler<TimerEvent>>, ack_timeout_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            timers,
            ack_timeout_ms,
            stats: DeliveryStats::default(),
        }
    }

    /// Track a sent response.
    ///
    /// Registering an op id that is already pending replaces the old record
    /// and cancels its timer.
    pub fn register(&mut self, op_id: u64, peer: SocketAddr, message: Bytes) -> CacheResult<()> {
        if op_id == 0 {
            return Err(CacheError::illegal_argument(
                "cannot track a response with op_id 0",
            ));
        }

        let timer = self.timers.add_timer(
            TimerEvent::AckTimeout { op_id },
            self.ack_timeout_ms,
            1,
        )?;
        let record = PendingResponse {
            op_id,
            peer,
            message,
            timer,
        };
        if let Some(previous) = self.pending.insert(op_id, record) {
            self.timers.cancel(previous.timer);
            tracing::debug!(op_id, peer = %previous.peer, "replaced pending response");
        }
        self.stats.registered += 1;
        Ok(())
    }

    /// Handle an Ack. Returns false when nothing was pending for `op_id`.
    pub fn unregister(&mut self, op_id: u64) -> bool {
        match self.pending.remove(&op_id) {
            Some(record) => {
                self.timers.cancel(record.timer);
                self.stats.acknowledged += 1;
                true
            }
            None => {
                // Already retransmitted and dropped, or a duplicate Ack
                tracing::debug!(op_id, "ack for unknown op_id");
                false
            }
        }
    }

    /// Take the response whose ack timer fired, for its single resend.
    pub fn on_ack_timeout(&mut self, op_id: u64) -> CacheResult<PendingResponse> {
        let record = self.pending.remove(&op_id).ok_or_else(|| {
            CacheError::sys_routine(format!("ack timer fired for unknown op_id {op_id}"))
        })?;
        self.stats.retransmitted += 1;
        Ok(record)
    }

    pub fn is_pending(&self, op_id: u64) -> bool {
        self.pending.contains_key(&op_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn ack_timeout_ms(&self) -> u64 {
        self.ack_timeout_ms
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            pending: self.pending.len(),
            ..self.stats
        }
    }
}
