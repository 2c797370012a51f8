//! Configuration parsing and validation.
//!
//! Configuration is loaded from TOML files with CLI overrides. Every section
//! has defaults, so an empty file is a valid configuration.

use crate::protocol::codec::RESPONSE_OVERHEAD_BYTES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

/// Largest UDP payload over IPv4.
const MAX_UDP_PAYLOAD: usize = 65_507;

/// Largest snowflake datacenter or worker id.
const MAX_NODE_ID: u8 = 31;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// UDP listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Lease window.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Response delivery.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Reactor timer polling.
    #[serde(default)]
    pub timer: TimerConfig,

    /// Client defaults used by the `read` and `update` commands.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Entries loaded into the store before the server accepts requests.
    #[serde(default, rename = "seed", skip_serializing_if = "Vec::is_empty")]
    pub seeds: Vec<SeedEntry>,
}

/// UDP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3824").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Largest datagram accepted or produced.
    #[serde(default = "default_max_datagram_bytes")]
    pub max_datagram_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_datagram_bytes: default_max_datagram_bytes(),
        }
    }
}

/// Lease configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Guarantee window granted by reads and writes, in milliseconds.
    #[serde(default = "default_lease_duration_ms")]
    pub duration_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_lease_duration_ms(),
        }
    }
}

/// Response delivery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How long a response waits for its Ack before the single resend.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

/// Reactor timer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Period between timer polls, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Snowflake datacenter id (0..=31).
    #[serde(default = "default_node_id")]
    pub datacenter_id: u8,

    /// Snowflake worker id (0..=31).
    #[serde(default = "default_node_id")]
    pub worker_id: u8,

    /// Lease length advertised in requests, in milliseconds.
    #[serde(default = "default_request_lease_ms")]
    pub request_lease_ms: u32,

    /// How long a command waits for its response. Covers deferred updates,
    /// which are answered only when the current lease lapses.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            datacenter_id: default_node_id(),
            worker_id: default_node_id(),
            request_lease_ms: default_request_lease_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// One `[[seed]]` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub cache_id: u32,
    pub data: String,
}

// Default value functions

fn default_bind() -> String {
    "0.0.0.0:3824".to_string()
}

fn default_max_datagram_bytes() -> usize {
    MAX_UDP_PAYLOAD
}

fn default_lease_duration_ms() -> u64 {
    10_000
}

fn default_ack_timeout_ms() -> u64 {
    500
}

fn default_tick_interval_ms() -> u64 {
    30
}

fn default_node_id() -> u8 {
    1
}

fn default_request_lease_ms() -> u32 {
    200
}

fn default_response_timeout_ms() -> u64 {
    15_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, else use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref bind) = overrides.bind {
            self.server.bind = bind.clone();
        }
        if let Some(lease_ms) = overrides.lease_ms {
            self.lease.duration_ms = lease_ms;
        }
    }

    /// Parsed bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("server.bind is not a socket address: {}", self.server.bind))
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_server()?;
        self.validate_timing()?;
        self.validate_client()?;
        self.validate_telemetry()?;
        self.validate_seeds()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<()> {
        self.bind_addr()?;

        if self.server.max_datagram_bytes == 0 || self.server.max_datagram_bytes > MAX_UDP_PAYLOAD
        {
            anyhow::bail!(
                "server.max_datagram_bytes must be in 1..={}, got: {}",
                MAX_UDP_PAYLOAD,
                self.server.max_datagram_bytes
            );
        }
        Ok(())
    }

    fn validate_timing(&self) -> Result<()> {
        if self.lease.duration_ms == 0 {
            anyhow::bail!("lease.duration_ms must be > 0");
        }
        if self.delivery.ack_timeout_ms == 0 {
            anyhow::bail!("delivery.ack_timeout_ms must be > 0");
        }
        if self.timer.tick_interval_ms == 0 {
            anyhow::bail!("timer.tick_interval_ms must be > 0");
        }

        // A response must be retransmitted well within one lease window
        if self.delivery.ack_timeout_ms >= self.lease.duration_ms {
            anyhow::bail!(
                "delivery.ack_timeout_ms ({}) must be less than lease.duration_ms ({})",
                self.delivery.ack_timeout_ms,
                self.lease.duration_ms
            );
        }
        Ok(())
    }

    fn validate_client(&self) -> Result<()> {
        if self.client.datacenter_id > MAX_NODE_ID {
            anyhow::bail!(
                "client.datacenter_id must be <= {}, got: {}",
                MAX_NODE_ID,
                self.client.datacenter_id
            );
        }
        if self.client.worker_id > MAX_NODE_ID {
            anyhow::bail!(
                "client.worker_id must be <= {}, got: {}",
                MAX_NODE_ID,
                self.client.worker_id
            );
        }
        if self.client.request_lease_ms == 0 {
            anyhow::bail!("client.request_lease_ms must be > 0");
        }
        if self.client.response_timeout_ms == 0 {
            anyhow::bail!("client.response_timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_seeds(&self) -> Result<()> {
        let limit = self
            .server
            .max_datagram_bytes
            .saturating_sub(RESPONSE_OVERHEAD_BYTES);
        let mut seen = HashSet::new();
        for seed in &self.seeds {
            if !seen.insert(seed.cache_id) {
                anyhow::bail!("seed.cache_id {} is listed more than once", seed.cache_id);
            }
            if seed.data.len() > limit {
                anyhow::bail!(
                    "seed.data for cache_id {} is {} bytes, limit is {}",
                    seed.cache_id,
                    seed.data.len(),
                    limit
                );
            }
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override bind address.
    pub bind: Option<String>,
    /// Override lease duration.
    pub lease_ms: Option<u64>,
}
