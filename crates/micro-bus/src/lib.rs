//! # MicroBus
//!
//! An embeddable, decentralized publish/subscribe message bus.
//!
//! Components exchange [`Message`] values through [`Channel`] handles
//! obtained from a [`MicroBus`]. A message sent to a group is delivered to
//! every other local channel that joined the group and, once the bus is
//! open, broadcast to every other bus instance on the subnet, which repeats
//! the local delivery step there.
//!
//! ## Quick Start
//!
//! ```rust
//! use micro_bus::{BusConfig, Message, MicroBus};
//!
//! let bus = MicroBus::new(BusConfig::default());
//! let producer = bus.channel();
//! let consumer = bus.channel();
//! consumer.join("orders").unwrap();
//!
//! let delivered = producer.send_to_group(Message::new(b"42".to_vec()), "orders").unwrap();
//! assert_eq!(delivered, 1);
//! let received = consumer.try_recv().unwrap().and_then(|d| d.into_message()).unwrap();
//! assert_eq!(received.payload(), b"42");
//! bus.shutdown();
//! ```
//!
//! ## Network
//!
//! [`MicroBus::open`] binds the UDP broadcast transport and the TCP bridge
//! and starts the background I/O thread. Without `open()` the bus is purely
//! in-process.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod stats;

pub use bus::MicroBus;
pub use channel::{Channel, ChannelEvent, ChannelEventKind, Delivery, ListenerId, Sink};
pub use config::{BusConfig, ConfigError, NetworkSettings, TimingSettings, TomlConfigProvider};
pub use error::BusError;
pub use lifecycle::{HookId, Lifecycle, LifecycleManager};
pub use stats::BusStats;

pub use mbus_net::{AccessControlList, AclEntry, NetworkSpec, RemoteNode, SystemTimeSource, TimeSource};
pub use mbus_types::{ChannelId, EndpointId, Message, MessageAddress, Timestamp};
