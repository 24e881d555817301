//! # MicroBus Network Layer
//!
//! Socket-owning half of the bus: everything that crosses a process
//! boundary lives here.
//!
//! ## Layers
//!
//! - **Access control** (`acl`): ordered allow/deny network rules gating
//!   inbound bridge connections. First match wins, no match denies.
//! - **Membership** (`membership`): remote nodes learned from heartbeats,
//!   pruned lazily once they stop announcing themselves.
//! - **Wire** (`wire`): the `Packet` datagram/frame format.
//! - **Transports** (`transport`): the UDP broadcast transport and the TCP
//!   bridge transport.
//! - **I/O service** (`service`): one background thread that owns and polls
//!   every transport.
//!
//! ## Threading
//!
//! ```text
//!  application threads                 mbus-io thread
//!  ───────────────────                 ──────────────
//!  BroadcastHandle::publish ──queue──▶ BroadcastTransport ──UDP──▶ subnet
//!  BridgeHandle::deliver    ──queue──▶ BridgeTransport    ──TCP──▶ peer
//!                                            │
//!                     InboundRouter ◀────────┘ (datagrams / frames)
//! ```
//!
//! Sockets are bound on the caller's thread so bind errors surface
//! synchronously, then handed to the I/O thread, which is their only user
//! from activation until release.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod acl;
pub mod error;
pub mod interface;
pub mod membership;
pub mod ports;
pub mod service;
pub mod time;
pub mod transport;
pub mod wire;

/// Test utilities (ManualTimeSource).
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use acl::{AccessControlList, AclEntry, AclParseError, NetworkSpec};
pub use error::NetError;
pub use interface::LocalInterface;
pub use membership::{Observation, RemoteNode, RemoteNodeTable};
pub use ports::{InboundRouter, TimeSource};
pub use service::{is_io_thread, IoService, ServiceStatus, Transport};
pub use time::SystemTimeSource;
pub use transport::broadcast::{
    bind_udp_socket, BroadcastConfig, BroadcastHandle, BroadcastTransport,
};
pub use transport::bridge::{BridgeConfig, BridgeHandle, BridgeTransport};
pub use wire::{Packet, PacketError, PacketType};

#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::ManualTimeSource;

/// Default UDP port of the broadcast bus.
pub const DEFAULT_BUS_PORT: u16 = 7943;

/// Default bounded wait of one I/O service poll.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// Default time after which a silent remote node is purged.
pub const DEFAULT_EXPIRY_MS: u64 = 60_000;

/// Default time an accepted bridge connection may stay silent before it
/// is closed.
pub const DEFAULT_BRIDGE_IDLE_MS: u64 = 30_000;

/// Minimum UDP receive buffer requested from the OS.
pub const DEFAULT_RECV_BUFFER_BYTES: usize = 128 * 1024;
