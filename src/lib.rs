//! leasecache - lease-guarded cache server over UDP.
//!
//! Every cache entry carries a lease: a reader that observes a value is
//! promised it will not change until the lease expires. A write to a leased
//! entry is staged and answered later, once the lease lapses and the value
//! is committed. Responses travel over UDP and are retransmitted once when
//! the client does not acknowledge them in time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Reactor (core::runtime, one task)               │
//! │           recv_from  ──►  dispatch  ◄──  timer poll             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      RequestDispatcher                          │
//! │   codec │ deferred updates │ DeliveryManager (ack/resend)       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          CacheStore                             │
//! │        value + LeaseStateMachine per key  │  TimerScheduler     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - UDP reactor
//! - [`core::time`] - Timestamps and clocks
//! - [`core::error`] - Error types and result codes
//!
//! ## Lease
//! - [`lease::timer`] - Min-heap timer scheduler
//! - [`lease::state_machine`] - Idle / Guaranteed / Protected automaton
//! - [`lease::store`] - Keyed store of leased values
//!
//! ## Protocol
//! - [`protocol`] - Wire messages
//! - [`protocol::codec`] - Datagram codec and envelope validation
//! - [`protocol::idgen`] - Snowflake op id generator
//!
//! ## Server and client
//! - [`server::dispatcher`] - Request dispatch
//! - [`server::delivery`] - Ack tracking and retransmission
//! - [`server::transport`] - Datagram transports
//! - [`client`] - Request/Ack driver
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - A value observed with expiry `e` does not change for new readers before `e`.
//! - At most one write is staged per key; later writes get `Retry`.
//! - A staged write is committed and answered exactly once.
//! - An unacknowledged response is resent exactly once.

// Core infrastructure
pub mod core;

// Lease engine
pub mod lease;

// Wire protocol
pub mod protocol;

// Server side
pub mod server;

// Client side
pub mod client;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use client::{CacheClient, CacheResponse, ClientSettings, RequestKind};
pub use lease::{state_machine, store, timer};
pub use server::{delivery, dispatcher, transport};
