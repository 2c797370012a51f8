//! CLI command implementations.

mod config;
mod exchange;
mod read;
mod start;
mod update;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use read::{run_read, ReadArgs};
pub use start::{run_start, StartArgs};
pub use update::{run_update, UpdateArgs};
