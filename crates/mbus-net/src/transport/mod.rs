//! # Transports
//!
//! A transport owns one socket and is driven by the I/O service:
//!
//! ```text
//!   activate ──▶ poll(wait) ──▶ housekeeping ──┐
//!                    ▲                         │
//!                    └─────────────────────────┘
//!                          (until stopped) ──▶ release
//! ```
//!
//! Application threads never touch a transport directly. They talk to it
//! through its handle (`BroadcastHandle`, `BridgeHandle`), which queues
//! work for the I/O thread.

pub mod broadcast;
pub mod bridge;

use crate::error::NetError;
use async_trait::async_trait;
use std::time::Duration;

/// A socket-owning component hosted by the I/O service.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Stable name, unique within one service (`"broadcast"`, `"bridge"`).
    fn name(&self) -> &'static str;

    /// Take ownership of the socket on the I/O thread. Called once, before
    /// the first poll.
    async fn activate(&mut self) -> Result<(), NetError>;

    /// Wait up to `wait` for one unit of work and handle it.
    ///
    /// Must be cancel-safe: the service drops an in-flight poll when the
    /// transport is removed.
    async fn poll(&mut self, wait: Duration) -> Result<(), NetError>;

    /// Periodic work, run after every poll whether or not it did anything.
    fn housekeeping(&mut self) {}

    /// Close the socket. Called exactly once; the transport is dropped after.
    fn release(&mut self);
}
