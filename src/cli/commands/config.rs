//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Config file path (defaults to the global --config).
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },
    /// Print the effective configuration, defaults included.
    Show {
        /// Config file path (defaults to the global --config).
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(global_config: Option<&Path>, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { file } => {
            let path = file.as_deref().or(global_config);
            validate_config(path)
        }
        ConfigCommand::Show { file } => {
            let path = file.as_deref().or(global_config);
            println!("{}", render_config(path)?);
            Ok(())
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        anyhow::bail!("no config file given; pass --config or --file");
    };
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }

    Config::from_file(path)?;
    println!("✓ Configuration valid: {}", path.display());
    Ok(())
}

/// Effective configuration as TOML.
pub(crate) fn render_config(path: Option<&Path>) -> Result<String> {
    let config = Config::load(path).context("failed to load config")?;
    config.to_toml()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_validate_good_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[lease]\nduration_ms = 5000").unwrap();
        assert!(validate_config(Some(file.path())).is_ok());
    }

    #[test]
    fn test_validate_bad_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[lease]\nduration_ms = 0").unwrap();
        assert!(validate_config(Some(file.path())).is_err());
        assert!(validate_config(None).is_err());
    }

    #[test]
    fn test_render_defaults() {
        let rendered = render_config(None).unwrap();
        assert!(rendered.contains("duration_ms = 10000"));
        assert!(rendered.contains("ack_timeout_ms = 500"));
    }
}
