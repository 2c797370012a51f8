//! Read command implementation.

use super::exchange::{client_config, exchange, print_response};
use crate::core::config::ConfigOverrides;
use anyhow::Result;
use clap::Args;
use std::net::SocketAddr;
use std::path::Path;

/// Read a key from a running server.
#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:3824")]
    pub server: SocketAddr,

    /// Key to read.
    #[arg(long)]
    pub cache_id: u32,
}

/// Run the read command.
pub async fn run_read(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
    args: ReadArgs,
) -> Result<()> {
    let config = client_config(config_path, &overrides)?;
    let response = exchange(&config, args.server, |client| client.read(args.cache_id)).await?;
    print_response(&response);
    Ok(())
}
