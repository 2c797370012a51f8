//! Datagram codec with envelope validation.

use super::{CacheMessage, MAGIC};
use crate::core::error::{CacheError, CacheResult};
use bytes::Bytes;
use prost::Message;

/// Largest payload a UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Upper bound on a response datagram minus its `cache_data` bytes.
///
/// Header with a full-width op id is at most 23 bytes and the response body
/// framing at most 27, so this leaves slack.
pub const RESPONSE_OVERHEAD_BYTES: usize = 64;

/// Encodes and validates [`CacheMessage`] datagrams.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_datagram_bytes: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_DATAGRAM_BYTES)
    }
}

impl MessageCodec {
    pub fn new(max_datagram_bytes: usize) -> Self {
        Self { max_datagram_bytes }
    }

    pub fn max_datagram_bytes(&self) -> usize {
        self.max_datagram_bytes
    }

    /// Largest `cache_data` that still fits in a response datagram.
    pub fn max_payload_bytes(&self) -> usize {
        self.max_datagram_bytes.saturating_sub(RESPONSE_OVERHEAD_BYTES)
    }

    /// Encode a message into a datagram.
    ///
    /// A message without a header is a logic error on the sending side.
    pub fn encode(&self, message: &CacheMessage) -> CacheResult<Bytes> {
        if message.header.is_none() {
            return Err(CacheError::sys_routine("cannot encode a message without header"));
        }

        let encoded = message.encode_to_vec();
        if encoded.len() > self.max_datagram_bytes {
            return Err(CacheError::illegal_argument(format!(
                "encoded message is {} bytes, limit is {}",
                encoded.len(),
                self.max_datagram_bytes
            )));
        }
        Ok(Bytes::from(encoded))
    }

    /// Decode and validate a datagram.
    ///
    /// Rejects unparsable bytes, a missing header, a foreign magic, an
    /// unknown message type and a zero op id.
    pub fn decode(&self, datagram: &[u8]) -> CacheResult<CacheMessage> {
        if datagram.len() > self.max_datagram_bytes {
            return Err(CacheError::decode(format!(
                "datagram of {} bytes exceeds limit {}",
                datagram.len(),
                self.max_datagram_bytes
            )));
        }

        let message = CacheMessage::decode(datagram)
            .map_err(|e| CacheError::decode(format!("malformed datagram: {}", e)))?;

        let header = message
            .header
            .as_ref()
            .ok_or_else(|| CacheError::decode("message has no header"))?;
        if header.magic != MAGIC {
            return Err(CacheError::decode(format!(
                "bad magic {:#010x}",
                header.magic
            )));
        }
        if header.message_type().is_none() {
            return Err(CacheError::decode(format!(
                "unknown message type {}",
                header.r#type
            )));
        }
        if header.op_id == 0 {
            return Err(CacheError::decode("op_id must be non-zero"));
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::OpResult;
    use crate::protocol::{CacheMessageHeader, CacheOpResponse, CacheReadRequest, MessageType};

    fn read_message(op_id: u64) -> CacheMessage {
        CacheMessage::read_request(
            op_id,
            CacheReadRequest {
                cache_id: 4,
                timestamp: 1,
                lease_ms: 200,
            },
        )
    }

    #[test]
    fn test_encode_decode() {
        let codec = MessageCodec::default();
        let bytes = codec.encode(&read_message(9)).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(codec.decode(&bytes).unwrap(), read_message(9));
    }

    #[test]
    fn test_encode_without_header() {
        let err = MessageCodec::default()
            .encode(&CacheMessage::default())
            .unwrap_err();
        assert!(err.is_fatal_for_operation());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = MessageCodec::default().decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_missing_header() {
        let body_only = CacheMessage {
            read_request: Some(CacheReadRequest::default()),
            ..CacheMessage::default()
        };
        let err = MessageCodec::default()
            .decode(&body_only.encode_to_vec())
            .unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_envelope() {
        let codec = MessageCodec::default();

        let mut bad_magic = read_message(1);
        if let Some(header) = bad_magic.header.as_mut() {
            header.magic = 0xdead_beef;
        }
        assert!(codec.decode(&bad_magic.encode_to_vec()).is_err());

        let mut bad_type = CacheMessageHeader::new(MessageType::Ack, 1);
        bad_type.r#type = 42;
        let msg = CacheMessage::with_header(bad_type);
        assert!(codec.decode(&msg.encode_to_vec()).is_err());

        let zero_op = CacheMessage::with_header(CacheMessageHeader::new(MessageType::Ack, 0));
        assert!(codec.decode(&zero_op.encode_to_vec()).is_err());
    }

    #[test]
    fn test_size_limit() {
        let codec = MessageCodec::new(8);
        let err = codec.encode(&read_message(1)).unwrap_err();
        assert!(matches!(err, CacheError::IllegalArgument { .. }));
        assert!(codec.decode(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_widest_response_fits_payload_bound() {
        for limit in [MAX_DATAGRAM_BYTES, 512] {
            let codec = MessageCodec::new(limit);
            let response = CacheMessage {
                header: Some(CacheMessageHeader::new(MessageType::UpdateResponse, u64::MAX)),
                op_response: Some(CacheOpResponse {
                    cache_id: u32::MAX,
                    cache_data: vec![0xab; codec.max_payload_bytes()],
                    expire: u64::MAX,
                    result: OpResult::ErrorNoData.as_i32(),
                }),
                ..CacheMessage::default()
            };
            let bytes = codec.encode(&response).unwrap();
            assert!(bytes.len() <= limit);
        }
    }
}
