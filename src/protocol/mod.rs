//! Cache wire protocol.
//!
//! Every datagram is one protobuf-encoded [`CacheMessage`]: a header carrying
//! magic, version, message type and op id, plus at most one body. The
//! `prost::Message` impls are written by hand so no build-time codegen is
//! needed.

pub mod codec;
pub mod idgen;

pub use codec::MessageCodec;
pub use idgen::IdGenerator;

use crate::core::error::OpResult;
use crate::core::time::Timestamp;
use prost::{DecodeError, Message};

/// Fixed envelope magic.
pub const MAGIC: u32 = 0x34EC_27D9;

/// Protocol version.
pub const VERSION: u32 = 1;

/// Message type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ReadRequest = 1,
    ReadResponse = 2,
    UpdateRequest = 3,
    UpdateResponse = 4,
    Ack = 5,
    Invalidate = 6,
}

impl MessageType {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Whether this is a response the client must acknowledge.
    pub fn is_response(self) -> bool {
        matches!(self, Self::ReadResponse | Self::UpdateResponse)
    }
}

impl TryFrom<i32> for MessageType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ReadRequest),
            2 => Ok(Self::ReadResponse),
            3 => Ok(Self::UpdateRequest),
            4 => Ok(Self::UpdateResponse),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Invalidate),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ReadRequest => "ReadRequest",
            Self::ReadResponse => "ReadResponse",
            Self::UpdateRequest => "UpdateRequest",
            Self::UpdateResponse => "UpdateResponse",
            Self::Ack => "Ack",
            Self::Invalidate => "Invalidate",
        };
        f.write_str(name)
    }
}

// ============================================================================
// CacheMessageHeader
// ============================================================================

/// Envelope shared by every message.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct CacheMessageHeader {
    pub magic: u32,    // field 1
    pub version: u32,  // field 2
    pub r#type: i32,   // field 3 (enum)
    pub op_id: u64,    // field 4
}

impl CacheMessageHeader {
    /// Header with the current magic and version.
    pub fn new(message_type: MessageType, op_id: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            r#type: message_type.as_i32(),
            op_id,
        }
    }

    /// Decoded message type, if in range.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.r#type).ok()
    }

    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.r#type = message_type.as_i32();
    }
}

impl Message for CacheMessageHeader {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.magic != 0 {
            prost::encoding::uint32::encode(1, &self.magic, buf);
        }
        if self.version != 0 {
            prost::encoding::uint32::encode(2, &self.version, buf);
        }
        if self.r#type != 0 {
            prost::encoding::int32::encode(3, &self.r#type, buf);
        }
        if self.op_id != 0 {
            prost::encoding::uint64::encode(4, &self.op_id, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::uint32::merge(wire_type, &mut self.magic, buf, ctx),
            2 => prost::encoding::uint32::merge(wire_type, &mut self.version, buf, ctx),
            3 => prost::encoding::int32::merge(wire_type, &mut self.r#type, buf, ctx),
            4 => prost::encoding::uint64::merge(wire_type, &mut self.op_id, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.magic != 0 {
            len += prost::encoding::uint32::encoded_len(1, &self.magic);
        }
        if self.version != 0 {
            len += prost::encoding::uint32::encoded_len(2, &self.version);
        }
        if self.r#type != 0 {
            len += prost::encoding::int32::encoded_len(3, &self.r#type);
        }
        if self.op_id != 0 {
            len += prost::encoding::uint64::encoded_len(4, &self.op_id);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// CacheReadRequest
// ============================================================================

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct CacheReadRequest {
    pub cache_id: u32,  // field 1
    pub timestamp: u64, // field 2
    pub lease_ms: u32,  // field 3
}

impl Message for CacheReadRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.cache_id != 0 {
            prost::encoding::uint32::encode(1, &self.cache_id, buf);
        }
        if self.timestamp != 0 {
            prost::encoding::uint64::encode(2, &self.timestamp, buf);
        }
        if self.lease_ms != 0 {
            prost::encoding::uint32::encode(3, &self.lease_ms, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::uint32::merge(wire_type, &mut self.cache_id, buf, ctx),
            2 => prost::encoding::uint64::merge(wire_type, &mut self.timestamp, buf, ctx),
            3 => prost::encoding::uint32::merge(wire_type, &mut self.lease_ms, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.cache_id != 0 {
            len += prost::encoding::uint32::encoded_len(1, &self.cache_id);
        }
        if self.timestamp != 0 {
            len += prost::encoding::uint64::encoded_len(2, &self.timestamp);
        }
        if self.lease_ms != 0 {
            len += prost::encoding::uint32::encoded_len(3, &self.lease_ms);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// CacheUpdateRequest
// ============================================================================

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct CacheUpdateRequest {
    pub cache_id: u32,       // field 1
    pub cache_data: Vec<u8>, // field 2
    pub timestamp: u64,      // field 3
    pub lease_ms: u32,       // field 4
}

impl Message for CacheUpdateRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.cache_id != 0 {
            prost::encoding::uint32::encode(1, &self.cache_id, buf);
        }
        if !self.cache_data.is_empty() {
            prost::encoding::bytes::encode(2, &self.cache_data, buf);
        }
        if self.timestamp != 0 {
            prost::encoding::uint64::encode(3, &self.timestamp, buf);
        }
        if self.lease_ms != 0 {
            prost::encoding::uint32::encode(4, &self.lease_ms, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::uint32::merge(wire_type, &mut self.cache_id, buf, ctx),
            2 => prost::encoding::bytes::merge(wire_type, &mut self.cache_data, buf, ctx),
            3 => prost::encoding::uint64::merge(wire_type, &mut self.timestamp, buf, ctx),
            4 => prost::encoding::uint32::merge(wire_type, &mut self.lease_ms, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.cache_id != 0 {
            len += prost::encoding::uint32::encoded_len(1, &self.cache_id);
        }
        if !self.cache_data.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.cache_data);
        }
        if self.timestamp != 0 {
            len += prost::encoding::uint64::encoded_len(3, &self.timestamp);
        }
        if self.lease_ms != 0 {
            len += prost::encoding::uint32::encoded_len(4, &self.lease_ms);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// CacheOpResponse
// ============================================================================

/// Body of ReadResponse and UpdateResponse.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct CacheOpResponse {
    pub cache_id: u32,       // field 1
    pub cache_data: Vec<u8>, // field 2
    pub expire: u64,         // field 3
    pub result: i32,         // field 4 (enum)
}

impl CacheOpResponse {
    /// Decoded result code, if in range.
    pub fn op_result(&self) -> Option<OpResult> {
        OpResult::try_from(self.result).ok()
    }

    /// Expiry as a timestamp.
    pub fn expire_at(&self) -> Timestamp {
        Timestamp::new(self.expire)
    }
}

impl Message for CacheOpResponse {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.cache_id != 0 {
            prost::encoding::uint32::encode(1, &self.cache_id, buf);
        }
        if !self.cache_data.is_empty() {
            prost::encoding::bytes::encode(2, &self.cache_data, buf);
        }
        if self.expire != 0 {
            prost::encoding::uint64::encode(3, &self.expire, buf);
        }
        if self.result != 0 {
            prost::encoding::int32::encode(4, &self.result, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::uint32::merge(wire_type, &mut self.cache_id, buf, ctx),
            2 => prost::encoding::bytes::merge(wire_type, &mut self.cache_data, buf, ctx),
            3 => prost::encoding::uint64::merge(wire_type, &mut self.expire, buf, ctx),
            4 => prost::encoding::int32::merge(wire_type, &mut self.result, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.cache_id != 0 {
            len += prost::encoding::uint32::encoded_len(1, &self.cache_id);
        }
        if !self.cache_data.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.cache_data);
        }
        if self.expire != 0 {
            len += prost::encoding::uint64::encoded_len(3, &self.expire);
        }
        if self.result != 0 {
            len += prost::encoding::int32::encoded_len(4, &self.result);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// CacheMessage
// ============================================================================

/// A complete datagram.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct CacheMessage {
    pub header: Option<CacheMessageHeader>,         // field 1
    pub read_request: Option<CacheReadRequest>,     // field 2
    pub update_request: Option<CacheUpdateRequest>, // field 3
    pub op_response: Option<CacheOpResponse>,       // field 4
}

impl CacheMessage {
    /// Header-only message, as used for acks.
    pub fn with_header(header: CacheMessageHeader) -> Self {
        Self {
            header: Some(header),
            ..Self::default()
        }
    }

    pub fn read_request(op_id: u64, request: CacheReadRequest) -> Self {
        Self {
            header: Some(CacheMessageHeader::new(MessageType::ReadRequest, op_id)),
            read_request: Some(request),
            ..Self::default()
        }
    }

    pub fn update_request(op_id: u64, request: CacheUpdateRequest) -> Self {
        Self {
            header: Some(CacheMessageHeader::new(MessageType::UpdateRequest, op_id)),
            update_request: Some(request),
            ..Self::default()
        }
    }

    /// Message type from the header.
    pub fn message_type(&self) -> Option<MessageType> {
        self.header.as_ref().and_then(CacheMessageHeader::message_type)
    }

    /// Op id from the header, zero when absent.
    pub fn op_id(&self) -> u64 {
        self.header.as_ref().map_or(0, |header| header.op_id)
    }
}

impl Message for CacheMessage {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref header) = self.header {
            prost::encoding::message::encode(1, header, buf);
        }
        if let Some(ref request) = self.read_request {
            prost::encoding::message::encode(2, request, buf);
        }
        if let Some(ref request) = self.update_request {
            prost::encoding::message::encode(3, request, buf);
        }
        if let Some(ref response) = self.op_response {
            prost::encoding::message::encode(4, response, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut header = self.header.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut header, buf, ctx)?;
                self.header = Some(header);
                Ok(())
            }
            2 => {
                let mut request = self.read_request.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut request, buf, ctx)?;
                self.read_request = Some(request);
                Ok(())
            }
            3 => {
                let mut request = self.update_request.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut request, buf, ctx)?;
                self.update_request = Some(request);
                Ok(())
            }
            4 => {
                let mut response = self.op_response.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut response, buf, ctx)?;
                self.op_response = Some(response);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref header) = self.header {
            len += prost::encoding::message::encoded_len(1, header);
        }
        if let Some(ref request) = self.read_request {
            len += prost::encoding::message::encoded_len(2, request);
        }
        if let Some(ref request) = self.update_request {
            len += prost::encoding::message::encoded_len(3, request);
        }
        if let Some(ref response) = self.op_response {
            len += prost::encoding::message::encoded_len(4, response);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_range() {
        assert_eq!(MessageType::try_from(1), Ok(MessageType::ReadRequest));
        assert_eq!(MessageType::try_from(6), Ok(MessageType::Invalidate));
        assert_eq!(MessageType::try_from(0), Err(0));
        assert_eq!(MessageType::try_from(7), Err(7));
        assert!(MessageType::UpdateResponse.is_response());
        assert!(!MessageType::Ack.is_response());
    }

    #[test]
    fn test_update_request_roundtrip() {
        let msg = CacheMessage::update_request(
            77,
            CacheUpdateRequest {
                cache_id: 2,
                cache_data: b"hello".to_vec(),
                timestamp: 1_700_000_000_000,
                lease_ms: 200,
            },
        );
        let bytes = msg.encode_to_vec();
        let decoded = CacheMessage::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.message_type(), Some(MessageType::UpdateRequest));
        assert_eq!(decoded.op_id(), 77);
    }

    #[test]
    fn test_unknown_fields_skipped() {
        // field 15, varint 1
        let mut bytes = vec![0x78, 0x01];
        CacheMessageHeader::new(MessageType::Ack, 5).encode(&mut bytes).unwrap();
        let header = CacheMessageHeader::decode(bytes.as_slice()).unwrap();
        assert_eq!(header.op_id, 5);
        assert_eq!(header.message_type(), Some(MessageType::Ack));
    }

    #[test]
    fn test_response_accessors() {
        let response = CacheOpResponse {
            cache_id: 1,
            cache_data: Vec::new(),
            expire: 123,
            result: OpResult::ErrorNoData.as_i32(),
        };
        assert_eq!(response.op_result(), Some(OpResult::ErrorNoData));
        assert_eq!(response.expire_at(), Timestamp::new(123));
    }
}
