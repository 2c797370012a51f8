//! Client side of the cache protocol.
//!
//! [`CacheClient`] sends read and update requests tagged with fresh op ids
//! and matches responses back to them. Every response is acknowledged, even
//! one that no longer matches a pending request: a server retransmission
//! after a lost Ack must still be answered so it stops resending.

use crate::core::config::Config;
use crate::core::error::{CacheError, CacheResult, OpResult};
use crate::core::time::{Clock, Timestamp};
use crate::protocol::{
    CacheMessage, CacheMessageHeader, CacheReadRequest, CacheUpdateRequest, IdGenerator,
    MessageCodec, MessageType,
};
use crate::server::transport::Transport;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Client tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub datacenter_id: u8,
    pub worker_id: u8,
    /// Lease length advertised in requests.
    pub request_lease_ms: u32,
    pub max_datagram_bytes: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ClientSettings {
    fn from(config: &Config) -> Self {
        Self {
            datacenter_id: config.client.datacenter_id,
            worker_id: config.client.worker_id,
            request_lease_ms: config.client.request_lease_ms,
            max_datagram_bytes: config.server.max_datagram_bytes,
        }
    }
}

/// Kind of request a response answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Update,
}

/// A response matched to its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResponse {
    pub op_id: u64,
    pub kind: RequestKind,
    pub cache_id: u32,
    pub result: OpResult,
    pub expire: Timestamp,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    kind: RequestKind,
    cache_id: u32,
}

/// Request/Ack driver for one server.
pub struct CacheClient<T> {
    transport: T,
    server: SocketAddr,
    codec: MessageCodec,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    request_lease_ms: u32,
    pending: HashMap<u64, PendingRequest>,
}

impl<T: Transport> CacheClient<T> {
    pub fn new(
        transport: T,
        server: SocketAddr,
        clock: Arc<dyn Clock>,
        settings: ClientSettings,
    ) -> CacheResult<Self> {
        let ids = IdGenerator::new(
            Arc::clone(&clock),
            settings.datacenter_id,
            settings.worker_id,
        )?;
        Ok(Self {
            transport,
            server,
            codec: MessageCodec::new(settings.max_datagram_bytes),
            clock,
            ids,
            request_lease_ms: settings.request_lease_ms,
            pending: HashMap::new(),
        })
    }

    /// Send a read request. Returns its op id.
    pub fn read(&mut self, cache_id: u32) -> CacheResult<u64> {
        let op_id = self.ids.next_id();
        let request = CacheMessage::read_request(
            op_id,
            CacheReadRequest {
                cache_id,
                timestamp: self.clock.now().ms,
                lease_ms: self.request_lease_ms,
            },
        );
        self.send_request(op_id, RequestKind::Read, cache_id, &request)?;
        Ok(op_id)
    }

    /// Send an update request. Returns its op id.
    pub fn update(&mut self, cache_id: u32, data: impl Into<Bytes>) -> CacheResult<u64> {
        let op_id = self.ids.next_id();
        let request = CacheMessage::update_request(
            op_id,
            CacheUpdateRequest {
                cache_id,
                cache_data: data.into().to_vec(),
                timestamp: self.clock.now().ms,
                lease_ms: self.request_lease_ms,
            },
        );
        self.send_request(op_id, RequestKind::Update, cache_id, &request)?;
        Ok(op_id)
    }

    /// Handle a datagram from the server.
    ///
    /// Returns the response the first time an op id is answered and `None`
    /// for duplicates and anything that is not a response.
    pub fn on_receive(&mut self, datagram: &[u8]) -> CacheResult<Option<CacheResponse>> {
        let message = match self.codec.decode(datagram) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "dropping datagram from server");
                return Ok(None);
            }
        };
        let Some(header) = message.header.as_ref() else {
            return Ok(None);
        };
        let op_id = header.op_id;
        let kind = match header.message_type() {
            Some(MessageType::ReadResponse) => RequestKind::Read,
            Some(MessageType::UpdateResponse) => RequestKind::Update,
            other => {
                tracing::debug!(op_id, message_type = ?other, "ignoring non-response");
                return Ok(None);
            }
        };

        self.send_ack(header)?;

        let Some(request) = self.pending.remove(&op_id) else {
            tracing::debug!(op_id, "response for unknown or completed op_id");
            return Ok(None);
        };

        let body = message.op_response.as_ref().ok_or_else(|| {
            CacheError::sys_routine(format!("response {op_id} carries no op_response"))
        })?;
        if body.cache_id != request.cache_id {
            return Err(CacheError::sys_routine(format!(
                "response {} is for cache_id {}, expected {}",
                op_id, body.cache_id, request.cache_id
            )));
        }
        if request.kind != kind {
            return Err(CacheError::sys_routine(format!(
                "response {op_id} does not match its request kind"
            )));
        }
        let result = body.op_result().ok_or_else(|| {
            CacheError::decode(format!("unknown result code {}", body.result))
        })?;

        Ok(Some(CacheResponse {
            op_id,
            kind,
            cache_id: body.cache_id,
            result,
            expire: body.expire_at(),
            data: Bytes::from(body.cache_data.clone()),
        }))
    }

    fn send_request(
        &mut self,
        op_id: u64,
        kind: RequestKind,
        cache_id: u32,
        request: &CacheMessage,
    ) -> CacheResult<()> {
        let datagram = self.codec.encode(request)?;
        self.transport.send(self.server, &datagram)?;
        self.pending.insert(op_id, PendingRequest { kind, cache_id });
        tracing::debug!(op_id, cache_id, kind = ?kind, server = %self.server, "request sent");
        Ok(())
    }

    fn send_ack(&self, response_header: &CacheMessageHeader) -> CacheResult<()> {
        let mut header = response_header.clone();
        header.set_message_type(MessageType::Ack);
        let datagram = self.codec.encode(&CacheMessage::with_header(header))?;
        self.transport.send(self.server, &datagram)?;
        Ok(())
    }

    /// Whether a request is still waiting for its response.
    pub fn is_pending(&self, op_id: u64) -> bool {
        self.pending.contains_key(&op_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use crate::protocol::CacheOpResponse;
    use crate::server::transport::MemoryTransport;
    use prost::Message;

    fn client() -> (CacheClient<Arc<MemoryTransport>>, Arc<MemoryTransport>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_000_000));
        let transport = Arc::new(MemoryTransport::new());
        let server = "127.0.0.1:3824".parse().unwrap();
        let client = CacheClient::new(
            Arc::clone(&transport),
            server,
            clock,
            ClientSettings::default(),
        )
        .unwrap();
        (client, transport)
    }

    fn response(op_id: u64, cache_id: u32, result: OpResult) -> Vec<u8> {
        CacheMessage {
            header: Some(CacheMessageHeader::new(MessageType::ReadResponse, op_id)),
            op_response: Some(CacheOpResponse {
                cache_id,
                cache_data: b"v".to_vec(),
                expire: 99,
                result: result.as_i32(),
            }),
            ..CacheMessage::default()
        }
        .encode_to_vec()
    }

    #[test]
    fn test_read_sends_request() {
        let (mut client, transport) = client();
        let op_id = client.read(5).unwrap();
        assert_ne!(op_id, 0);
        assert!(client.is_pending(op_id));

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        let request = CacheMessage::decode(sent[0].1.as_ref()).unwrap();
        assert_eq!(request.message_type(), Some(MessageType::ReadRequest));
        assert_eq!(request.op_id(), op_id);
        let body = request.read_request.unwrap();
        assert_eq!(body.cache_id, 5);
        assert_eq!(body.lease_ms, 200);
    }

    #[test]
    fn test_response_is_acked_and_returned_once() {
        let (mut client, transport) = client();
        let op_id = client.read(5).unwrap();
        transport.take_sent();

        let first = client.on_receive(&response(op_id, 5, OpResult::Ok)).unwrap();
        let first = first.unwrap();
        assert_eq!(first.result, OpResult::Ok);
        assert_eq!(first.data, Bytes::from_static(b"v"));
        assert_eq!(first.expire, Timestamp::new(99));

        // Retransmitted copy is acked but not surfaced again
        assert!(client.on_receive(&response(op_id, 5, OpResult::Ok)).unwrap().is_none());

        let acks = transport.take_sent();
        assert_eq!(acks.len(), 2);
        for (_, datagram) in acks {
            let ack = CacheMessage::decode(datagram.as_ref()).unwrap();
            assert_eq!(ack.message_type(), Some(MessageType::Ack));
            assert_eq!(ack.op_id(), op_id);
            assert!(ack.op_response.is_none());
        }
    }

    #[test]
    fn test_cache_id_mismatch() {
        let (mut client, _transport) = client();
        let op_id = client.read(5).unwrap();
        let err = client.on_receive(&response(op_id, 6, OpResult::Ok)).unwrap_err();
        assert!(err.is_fatal_for_operation());
    }

    #[test]
    fn test_garbage_is_dropped() {
        let (mut client, transport) = client();
        transport.take_sent();
        assert!(client.on_receive(b"\xff\xff").unwrap().is_none());
        assert_eq!(transport.sent_count(), 0);
    }
}
