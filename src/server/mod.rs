//! Cache server: transport, at-least-once delivery and request dispatch.
//!
//! - [`transport`] - datagram send abstraction and its UDP implementation
//! - [`delivery`] - ack tracking and single retransmission of responses
//! - [`dispatcher`] - maps inbound messages and timer events to the cache

pub mod delivery;
pub mod dispatcher;
pub mod transport;

pub use delivery::{DeliveryManager, DeliveryStats, PendingResponse, DEFAULT_ACK_TIMEOUT_MS};
pub use dispatcher::{DispatchStats, DispatcherSettings, RequestDispatcher};
pub use transport::{MemoryTransport, Transport, UdpTransport};
