//! Request dispatch.
//!
//! [`RequestDispatcher`] owns the cache store, the delivery manager and the
//! table of deferred update requests. The reactor feeds it datagrams through
//! [`RequestDispatcher::on_receive`] and drives time through
//! [`RequestDispatcher::poll_timers`]; both run to completion before the next
//! datagram is handled.

use super::delivery::{DeliveryManager, DeliveryStats};
use super::transport::Transport;
use crate::core::config::{Config, SeedEntry};
use crate::core::error::{CacheError, CacheResult, OpResult};
use crate::core::time::Timestamp;
use crate::lease::state_machine::LeaseGrant;
use crate::lease::store::{CacheStore, DeferredCompletion, StoreStats};
use crate::lease::timer::{TimerEvent, TimerScheduler};
use crate::protocol::{CacheMessage, CacheOpResponse, MessageCodec, MessageType};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Tunables for a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Guarantee window granted by reads and writes.
    pub lease_ms: u64,
    /// Retransmit window for unacknowledged responses.
    pub ack_timeout_ms: u64,
    /// Datagram size limit for the codec.
    pub max_datagram_bytes: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DispatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            lease_ms: config.lease.duration_ms,
            ack_timeout_ms: config.delivery.ack_timeout_ms,
            max_datagram_bytes: config.server.max_datagram_bytes,
        }
    }
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Datagrams handed to `on_receive`.
    pub received: u64,
    /// Datagrams dropped because they failed to decode or had no body.
    pub dropped: u64,
    /// Responses sent, retransmissions excluded.
    pub responses: u64,
    /// Sends the transport refused.
    pub send_failures: u64,
}

/// An update request waiting for its lease to lapse.
#[derive(Debug, Clone)]
struct DeferredRequest {
    peer: SocketAddr,
    request: CacheMessage,
}

/// Routes decoded messages to the cache and timer events to their owners.
pub struct RequestDispatcher<T> {
    codec: MessageCodec,
    store: CacheStore<Bytes>,
    delivery: DeliveryManager,
    deferred: HashMap<u64, DeferredRequest>,
    timers: Arc<TimerScheduler<TimerEvent>>,
    transport: T,
    stats: DispatchStats,
}

impl<T: Transport> RequestDispatcher<T> {
    pub fn new(
        transport: T,
        timers: Arc<TimerScheduler<TimerEvent>>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            codec: MessageCodec::new(settings.max_datagram_bytes),
            store: CacheStore::new(Arc::clone(&timers), settings.lease_ms),
            delivery: DeliveryManager::new(Arc::clone(&timers), settings.ack_timeout_ms),
            deferred: HashMap::new(),
            timers,
            transport,
            stats: DispatchStats::default(),
        }
    }

    /// Handle one inbound datagram.
    ///
    /// Malformed datagrams are logged and dropped. An `Err` means a contract
    /// or invariant violation while processing a well-formed message.
    pub fn on_receive(&mut self, peer: SocketAddr, datagram: &[u8]) -> CacheResult<()> {
        self.stats.received += 1;

        let message = match self.codec.decode(datagram) {
            Ok(message) => message,
            Err(err) => {
                self.stats.dropped += 1;
                tracing::warn!(peer = %peer, error = %err, "dropping datagram");
                return Ok(());
            }
        };

        match message.message_type() {
            Some(MessageType::ReadRequest) => self.handle_read(peer, message),
            Some(MessageType::UpdateRequest) => self.handle_update(peer, message),
            Some(MessageType::Ack) => {
                self.delivery.unregister(message.op_id());
                Ok(())
            }
            other => {
                tracing::info!(
                    peer = %peer,
                    op_id = message.op_id(),
                    message_type = ?other,
                    "ignoring unsupported message type"
                );
                Ok(())
            }
        }
    }

    /// Load configured entries into the store.
    ///
    /// Seeded entries start Idle, so the first read grants their lease.
    pub fn seed(&mut self, seeds: &[SeedEntry]) -> CacheResult<()> {
        for seed in seeds {
            self.check_payload(seed.data.len())?;
            self.store
                .preload(seed.cache_id, Bytes::copy_from_slice(seed.data.as_bytes()))?;
        }
        if !seeds.is_empty() {
            tracing::info!(entries = seeds.len(), "store seeded");
        }
        Ok(())
    }

    /// Fire due timers and route their events.
    ///
    /// A failing event is logged and does not stop the pass. Returns the
    /// number of events fired.
    pub fn poll_timers(&mut self) -> usize {
        let timers = Arc::clone(&self.timers);
        timers.tick(|event| {
            if let Err(err) = self.on_timer(event) {
                tracing::error!(event = ?event, error = %err, "timer event failed");
            }
        })
    }

    /// Route a single timer event.
    pub fn on_timer(&mut self, event: TimerEvent) -> CacheResult<()> {
        match event {
            TimerEvent::LeaseExpired { cache_id } => {
                if let Some(done) = self.store.on_lease_expired(cache_id)? {
                    self.complete_deferred(done)?;
                }
                Ok(())
            }
            TimerEvent::AckTimeout { op_id } => {
                let record = self.delivery.on_ack_timeout(op_id)?;
                tracing::debug!(op_id, peer = %record.peer, "retransmitting response");
                if let Err(err) = self.send(record.peer, &record.message) {
                    tracing::warn!(op_id, peer = %record.peer, error = %err, "retransmit failed");
                }
                Ok(())
            }
        }
    }

    fn handle_read(&mut self, peer: SocketAddr, request: CacheMessage) -> CacheResult<()> {
        let op_id = request.op_id();
        let Some(body) = request.read_request.as_ref() else {
            return self.drop_bodyless(peer, op_id, MessageType::ReadRequest);
        };
        let cache_id = body.cache_id;

        let (result, expire, data) = match self.store.read_op(cache_id, op_id) {
            Ok(outcome) => (outcome.result, outcome.expire, outcome.value.unwrap_or_default()),
            Err(err) => match err.to_op_result() {
                Some(result) => (result, Timestamp::zero(), Bytes::new()),
                None => return Err(err),
            },
        };

        tracing::debug!(op_id, cache_id, result = %result, expire = %expire, "read handled");
        let response = CacheOpResponse {
            cache_id,
            cache_data: data.to_vec(),
            expire: expire.ms,
            result: result.as_i32(),
        };
        self.respond(peer, &request, MessageType::ReadResponse, response)
    }

    fn handle_update(&mut self, peer: SocketAddr, request: CacheMessage) -> CacheResult<()> {
        let op_id = request.op_id();
        let Some(body) = request.update_request.as_ref() else {
            return self.drop_bodyless(peer, op_id, MessageType::UpdateRequest);
        };
        if self.deferred.contains_key(&op_id) {
            // The deferred response will answer the retransmitted request
            tracing::debug!(op_id, peer = %peer, "update already deferred");
            return Ok(());
        }

        let cache_id = body.cache_id;
        let data = Bytes::from(body.cache_data.clone());
        let outcome = self
            .check_payload(data.len())
            .and_then(|()| self.store.update_op(cache_id, data.clone(), op_id));
        let grant = match outcome {
            Ok(grant) => grant,
            Err(err) => match err.to_op_result() {
                Some(result) => {
                    tracing::warn!(op_id, cache_id, peer = %peer, error = %err, "update rejected");
                    LeaseGrant {
                        result,
                        expire: Timestamp::zero(),
                    }
                }
                None => return Err(err),
            },
        };

        if grant.result == OpResult::Defer {
            self.deferred
                .insert(op_id, DeferredRequest { peer, request });
            return Ok(());
        }

        let response = CacheOpResponse {
            cache_id,
            cache_data: if grant.result.is_error() {
                Vec::new()
            } else {
                data.to_vec()
            },
            expire: grant.expire.ms,
            result: grant.result.as_i32(),
        };
        self.respond(peer, &request, MessageType::UpdateResponse, response)
    }

    /// Reject data too large to echo back in a response datagram.
    fn check_payload(&self, len: usize) -> CacheResult<()> {
        let limit = self.codec.max_payload_bytes();
        if len > limit {
            return Err(CacheError::illegal_argument(format!(
                "cache_data of {len} bytes exceeds the {limit} byte response limit"
            )));
        }
        Ok(())
    }

    /// Answer a deferred update now that its value is committed.
    fn complete_deferred(&mut self, done: DeferredCompletion) -> CacheResult<()> {
        let DeferredRequest { peer, request } =
            self.deferred.remove(&done.op_id).ok_or_else(|| {
                CacheError::sys_routine(format!(
                    "no deferred request for committed op_id {}",
                    done.op_id
                ))
            })?;

        let data = self.store.peek(done.cache_id).cloned().unwrap_or_default();
        let response = CacheOpResponse {
            cache_id: done.cache_id,
            cache_data: data.to_vec(),
            expire: done.expire.ms,
            result: done.result.as_i32(),
        };
        self.respond(peer, &request, MessageType::UpdateResponse, response)
    }

    /// Send a response reusing the request's header, then track it until acked.
    fn respond(
        &mut self,
        peer: SocketAddr,
        request: &CacheMessage,
        message_type: MessageType,
        body: CacheOpResponse,
    ) -> CacheResult<()> {
        let mut header = request
            .header
            .clone()
            .ok_or_else(|| CacheError::sys_routine("responding to a request without header"))?;
        header.set_message_type(message_type);
        let op_id = header.op_id;

        let response = CacheMessage {
            header: Some(header),
            op_response: Some(body),
            ..CacheMessage::default()
        };
        let datagram = self.codec.encode(&response)?;

        self.stats.responses += 1;
        if let Err(err) = self.send(peer, &datagram) {
            tracing::warn!(op_id, peer = %peer, error = %err, "send failed, awaiting retransmit");
        }
        self.delivery.register(op_id, peer, datagram)
    }

    fn send(&mut self, peer: SocketAddr, datagram: &[u8]) -> CacheResult<()> {
        self.transport.send(peer, datagram).map_err(|err| {
            self.stats.send_failures += 1;
            CacheError::from(err)
        })?;
        Ok(())
    }

    fn drop_bodyless(
        &mut self,
        peer: SocketAddr,
        op_id: u64,
        message_type: MessageType,
    ) -> CacheResult<()> {
        self.stats.dropped += 1;
        tracing::warn!(peer = %peer, op_id, message_type = %message_type, "request has no body");
        Ok(())
    }

    pub fn store(&self) -> &CacheStore<Bytes> {
        &self.store
    }

    pub fn delivery(&self) -> &DeliveryManager {
        &self.delivery
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timers(&self) -> &Arc<TimerScheduler<TimerEvent>> {
        &self.timers
    }

    /// Number of update requests waiting for a lease to lapse.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.delivery.stats()
    }
}
