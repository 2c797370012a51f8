//! Command-line interface.
//!
//! Unified CLI for running the cache server and talking to it.

pub mod commands;

use clap::{Parser, Subcommand};

/// leasecache - lease-guarded cache server over UDP.
#[derive(Parser, Debug)]
#[command(name = "leasecache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the cache server.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Read a key from a running server.
    Read(commands::ReadArgs),
    /// Write a key on a running server.
    Update(commands::UpdateArgs),
}
