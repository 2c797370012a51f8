//! One request/response exchange with a running server.

use super::start::init_tracing;
use crate::client::{CacheClient, CacheResponse, ClientSettings};
use crate::core::config::{Config, ConfigOverrides};
use crate::core::error::CacheResult;
use crate::core::time::SystemClock;
use crate::server::transport::UdpTransport;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Load config for a client command and set up logging.
pub(crate) fn client_config(
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<Config> {
    let mut config = Config::load(config_path)?;
    config.apply_overrides(overrides);
    config.validate()?;
    // Client commands print their result; keep logs to warnings unless asked
    let level = overrides.log_level.as_deref().unwrap_or("warn");
    init_tracing(level);
    Ok(config)
}

/// Send one request built by `send` and wait for its response.
///
/// Every response received is acknowledged by the client, including
/// retransmitted duplicates that arrive while waiting.
pub(crate) async fn exchange<F>(config: &Config, server: SocketAddr, send: F) -> Result<CacheResponse>
where
    F: FnOnce(&mut CacheClient<UdpTransport>) -> CacheResult<u64>,
{
    let bind = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind)
        .await
        .context("failed to bind client socket")?;
    let socket = Arc::new(socket);
    socket.writable().await?;

    let mut client = CacheClient::new(
        UdpTransport::new(Arc::clone(&socket)),
        server,
        Arc::new(SystemClock),
        ClientSettings::from(config),
    )?;
    let op_id = send(&mut client)?;
    tracing::debug!(op_id, server = %server, "waiting for response");

    let mut buf = vec![0u8; config.server.max_datagram_bytes];
    let wait = async {
        loop {
            let (len, from) = socket.recv_from(&mut buf).await?;
            if from != server {
                tracing::debug!(from = %from, "ignoring datagram from unexpected peer");
                continue;
            }
            if let Some(response) = client.on_receive(&buf[..len])? {
                if response.op_id == op_id {
                    return Ok::<_, anyhow::Error>(response);
                }
            }
        }
    };

    tokio::time::timeout(Duration::from_millis(config.client.response_timeout_ms), wait)
        .await
        .with_context(|| {
            format!(
                "no response from {} within {}ms",
                server, config.client.response_timeout_ms
            )
        })?
}

/// Print a response on stdout.
pub(crate) fn print_response(response: &CacheResponse) {
    println!("op_id:    {}", response.op_id);
    println!("cache_id: {}", response.cache_id);
    println!("result:   {}", response.result);
    println!("expire:   {}", response.expire);
    if !response.data.is_empty() {
        println!("data:     {}", String::from_utf8_lossy(&response.data));
    }
}
