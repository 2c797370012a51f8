//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - UDP reactor driving the dispatcher
//! - [`time`] - Timestamps and injectable clocks
//! - [`error`] - Error types and protocol result codes

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
