//! leasecache - unified CLI entrypoint.
//!
//! Usage:
//!   leasecache start --config cache.toml
//!   leasecache config validate --config cache.toml
//!   leasecache config show
//!   leasecache read --server 127.0.0.1:3824 --cache-id 2
//!   leasecache update --server 127.0.0.1:3824 --cache-id 2 --data hello

use anyhow::Result;
use clap::Parser;
use leasecache::cli::commands::{run_config, run_read, run_start, run_update};
use leasecache::cli::{Cli, Commands};
use leasecache::config::ConfigOverrides;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.map(PathBuf::from);
    let overrides = ConfigOverrides {
        log_level: cli.log_level,
        ..ConfigOverrides::default()
    };

    match cli.command {
        Commands::Start(args) => run_start(config_path.as_deref(), overrides, args).await,
        Commands::Config(args) => run_config(config_path.as_deref(), args),
        Commands::Read(args) => run_read(config_path.as_deref(), overrides, args).await,
        Commands::Update(args) => run_update(config_path.as_deref(), overrides, args).await,
    }
}
