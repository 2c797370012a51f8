//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use bytes::Bytes;
use leasecache::core::config::Config;
use leasecache::core::time::{Clock, ManualClock, Timestamp};
use leasecache::lease::timer::TimerScheduler;
use leasecache::protocol::{
    CacheMessage, CacheMessageHeader, CacheOpResponse, CacheReadRequest, CacheUpdateRequest,
    MessageType,
};
use leasecache::server::dispatcher::{DispatcherSettings, RequestDispatcher};
use leasecache::server::transport::MemoryTransport;
use prost::Message;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Start of the manual clock used by harnesses.
pub const START_MS: u64 = 1_000_000;

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(b"# defaults only\n")
        .expect("Failed to write config");
    file
}

/// Create a configuration with custom timing and log level.
pub fn create_config_with_settings(
    lease_ms: u64,
    ack_timeout_ms: u64,
    log_level: &str,
) -> NamedTempFile {
    let config_content = format!(
        r#"
[server]
bind = "127.0.0.1:0"

[lease]
duration_ms = {}

[delivery]
ack_timeout_ms = {}

[telemetry]
log_level = "{}"
"#,
        lease_ms, ack_timeout_ms, log_level
    );

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a configuration with `[[seed]]` rows.
pub fn create_config_with_seeds(seeds: &[(u32, &str)]) -> NamedTempFile {
    let mut config_content = String::from("[server]\nbind = \"127.0.0.1:0\"\n");
    for (cache_id, data) in seeds {
        config_content.push_str(&format!(
            "\n[[seed]]\ncache_id = {}\ndata = \"{}\"\n",
            cache_id, data
        ));
    }

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Config for a server bound to an ephemeral loopback port.
pub fn loopback_config(lease_ms: u64, ack_timeout_ms: u64) -> Config {
    let mut config = Config::default();
    config.server.bind = "127.0.0.1:0".to_string();
    config.lease.duration_ms = lease_ms;
    config.delivery.ack_timeout_ms = ack_timeout_ms;
    config.timer.tick_interval_ms = 5;
    config.client.response_timeout_ms = 5_000;
    config
}

// ============================================================================
// Message builders
// ============================================================================

pub fn read_request(op_id: u64, cache_id: u32) -> Vec<u8> {
    CacheMessage::read_request(
        op_id,
        CacheReadRequest {
            cache_id,
            timestamp: START_MS,
            lease_ms: 200,
        },
    )
    .encode_to_vec()
}

pub fn update_request(op_id: u64, cache_id: u32, data: &str) -> Vec<u8> {
    CacheMessage::update_request(
        op_id,
        CacheUpdateRequest {
            cache_id,
            cache_data: data.as_bytes().to_vec(),
            timestamp: START_MS,
            lease_ms: 200,
        },
    )
    .encode_to_vec()
}

pub fn header_only(message_type: MessageType, op_id: u64) -> Vec<u8> {
    CacheMessage::with_header(CacheMessageHeader::new(message_type, op_id)).encode_to_vec()
}

pub fn ack(op_id: u64) -> Vec<u8> {
    header_only(MessageType::Ack, op_id)
}

// ============================================================================
// Dispatcher harness
// ============================================================================

/// A decoded response captured from the transport.
#[derive(Debug, Clone)]
pub struct Sent {
    pub peer: SocketAddr,
    pub raw: Bytes,
    pub message: CacheMessage,
}

impl Sent {
    pub fn message_type(&self) -> Option<MessageType> {
        self.message.message_type()
    }

    pub fn op_id(&self) -> u64 {
        self.message.op_id()
    }

    pub fn body(&self) -> &CacheOpResponse {
        self.message
            .op_response
            .as_ref()
            .expect("response without op_response")
    }

    pub fn data(&self) -> &str {
        std::str::from_utf8(&self.body().cache_data).expect("non-utf8 cache data")
    }
}

/// Dispatcher over a manual clock and an in-memory transport.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub transport: Arc<MemoryTransport>,
    pub dispatcher: RequestDispatcher<Arc<MemoryTransport>>,
    pub peer: SocketAddr,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(DispatcherSettings::default())
    }

    pub fn with_settings(settings: DispatcherSettings) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let timers = Arc::new(TimerScheduler::new(clock.clone() as Arc<dyn Clock>));
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = RequestDispatcher::new(Arc::clone(&transport), timers, settings);
        Self {
            clock,
            transport,
            dispatcher,
            peer: "192.0.2.10:40000".parse().unwrap(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Deliver a datagram from the harness peer.
    pub fn receive(&mut self, datagram: &[u8]) {
        let peer = self.peer;
        self.dispatcher
            .on_receive(peer, datagram)
            .expect("on_receive failed");
    }

    /// Advance the clock and poll timers.
    pub fn advance(&mut self, ms: u64) -> usize {
        self.clock.advance(ms);
        self.dispatcher.poll_timers()
    }

    /// Take and decode everything sent so far.
    pub fn sent(&self) -> Vec<Sent> {
        self.transport
            .take_sent()
            .into_iter()
            .map(|(peer, raw)| Sent {
                peer,
                message: CacheMessage::decode(raw.as_ref()).expect("undecodable response"),
                raw,
            })
            .collect()
    }

    /// Take exactly one sent response.
    #[track_caller]
    pub fn single(&self) -> Sent {
        let mut sent = self.sent();
        assert_eq!(sent.len(), 1, "expected one datagram, got {:?}", sent);
        sent.remove(0)
    }

    /// Send a request, take its response and acknowledge it.
    #[track_caller]
    pub fn request_acked(&mut self, datagram: &[u8]) -> Sent {
        self.receive(datagram);
        let response = self.single();
        self.receive(&ack(response.op_id()));
        response
    }
}

/// Assert that a result is Ok and return the value.
#[track_caller]
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a result is Err.
#[track_caller]
pub fn assert_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
        Err(e) => e,
    }
}
