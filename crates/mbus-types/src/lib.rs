//! # MicroBus Types
//!
//! Message and addressing types shared by every MicroBus crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: anything that crosses the wire is defined here.
//! - **Transient metadata stays local**: the originating channel and the
//!   network sender of a [`Message`] are never serialized.
//! - **Clone is a deep copy**: every local delivery receives its own
//!   independently mutable [`Message`].

pub mod entities;
pub mod errors;
pub mod message;

pub use entities::{ChannelId, EndpointId, MessageAddress, Timestamp};
pub use errors::AddressParseError;
pub use message::Message;
