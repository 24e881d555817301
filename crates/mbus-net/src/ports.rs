//! # Ports
//!
//! Interfaces the network layer requires from its host.

use mbus_types::{Message, Timestamp};

/// Entry point for messages arriving from the network.
///
/// The bus facade implements this to run its local routing step. Called on
/// the I/O thread, once per decoded data packet or bridge frame.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: transports hold them behind an
/// `Arc` and invoke them from the I/O thread.
pub trait InboundRouter: Send + Sync {
    /// Route one inbound message. Must not block for long: the I/O loop is
    /// stalled while this runs.
    fn route_inbound(&self, message: Message);
}

/// Abstract interface for time-related operations.
///
/// Enables deterministic expiry tests by injecting a controllable clock.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp.
    fn now(&self) -> Timestamp;
}
