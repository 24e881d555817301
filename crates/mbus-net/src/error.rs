//! # Network Errors
//!
//! Errors raised by transports and the I/O service. Transport-level errors
//! are logged by the I/O loop; only binding and delivery errors reach
//! application threads.

use crate::wire::PacketError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from network operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket-level failure (bind, send, receive).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet could not be encoded or decoded.
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// Encoded message does not fit in one datagram.
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Encoded packet size.
        size: usize,
        /// Largest datagram the transport sends.
        max: usize,
    },

    /// No interface could be resolved for the bus.
    #[error("No usable network interface: {0}")]
    NoInterface(String),

    /// The transport has not been activated on the I/O thread.
    #[error("Transport {0} is not active")]
    NotActive(&'static str),

    /// The I/O service was destroyed; it cannot be restarted.
    #[error("I/O service has been destroyed")]
    Destroyed,

    /// The I/O thread could not be spawned.
    #[error("Failed to start I/O thread: {0}")]
    Spawn(String),

    /// The bridge transport is not running.
    #[error("Bridge transport is not running")]
    BridgeUnavailable,

    /// A point-to-point delivery failed.
    #[error("Delivery to {peer} failed: {reason}")]
    Delivery {
        /// Remote bridge address.
        peer: SocketAddr,
        /// What went wrong.
        reason: String,
    },

    /// A point-to-point delivery was not acknowledged in time.
    #[error("Delivery to {peer} timed out")]
    Timeout {
        /// Remote bridge address.
        peer: SocketAddr,
    },

    /// A blocking call was made from the I/O thread, which would deadlock.
    #[error("Blocking network call issued from the I/O thread")]
    OnIoThread,
}
