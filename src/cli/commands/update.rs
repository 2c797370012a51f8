//! Update command implementation.

use super::exchange::{client_config, exchange, print_response};
use crate::core::config::ConfigOverrides;
use anyhow::Result;
use clap::Args;
use std::net::SocketAddr;
use std::path::Path;

/// Write a key on a running server.
///
/// A write to a leased key is answered only once the lease lapses, so this
/// can wait up to one lease window.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:3824")]
    pub server: SocketAddr,

    /// Key to write.
    #[arg(long)]
    pub cache_id: u32,

    /// Value to store.
    #[arg(long)]
    pub data: String,
}

/// Run the update command.
pub async fn run_update(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
    args: UpdateArgs,
) -> Result<()> {
    let config = client_config(config_path, &overrides)?;
    let data = args.data.into_bytes();
    let response = exchange(&config, args.server, |client| {
        client.update(args.cache_id, data)
    })
    .await?;
    print_response(&response);
    Ok(())
}
