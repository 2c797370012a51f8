//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the cache server.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Override the UDP bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Override the lease duration in milliseconds.
    #[arg(long)]
    pub lease_ms: Option<u64>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` wins over the configured level.
#[cfg(feature = "telemetry")]
pub(crate) fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub(crate) fn init_tracing(_level: &str) {}

/// Run the start command.
pub async fn run_start(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
    args: StartArgs,
) -> Result<()> {
    let mut config = Config::load(config_path).with_context(|| match config_path {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to build default config".to_string(),
    })?;
    config.apply_overrides(&ConfigOverrides {
        log_level: overrides.log_level,
        bind: args.bind.or(overrides.bind),
        lease_ms: args.lease_ms.or(overrides.lease_ms),
    });
    config.validate().context("invalid configuration after overrides")?;

    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::bind(config).await?;
    runtime.run().await
}
