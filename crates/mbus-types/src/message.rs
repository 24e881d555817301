//! # Message
//!
//! The value exchanged through channels and across the network.

use crate::entities::{ChannelId, MessageAddress, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use uuid::Uuid;

/// A message published on the bus.
///
/// A message is routed either by `group` (many-to-many) or, when `target` is
/// set, to an explicit endpoint and channel. The `source` and `sender` fields
/// are local metadata: they are skipped by serde and reset on every hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id, assigned at construction and preserved across hops.
    id: Uuid,
    /// Topic used for group matching.
    group: Option<String>,
    /// Explicit destination; bypasses group matching.
    target: Option<MessageAddress>,
    /// Opaque payload bytes.
    payload: Vec<u8>,
    /// Free-form string headers, ordered by key.
    headers: BTreeMap<String, String>,
    /// Creation time.
    timestamp: Timestamp,

    /// Channel the message was sent from, used to suppress echo.
    #[serde(skip)]
    source: Option<ChannelId>,
    /// Network address the message was received from.
    #[serde(skip)]
    sender: Option<SocketAddr>,
}

impl Message {
    /// Create a message carrying `payload`.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group: None,
            target: None,
            payload: payload.into(),
            headers: BTreeMap::new(),
            timestamp: Timestamp::now(),
            source: None,
            sender: None,
        }
    }

    /// Set the group this message is published to.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Address this message to a specific endpoint and channel.
    #[must_use]
    pub fn with_target(mut self, target: MessageAddress) -> Self {
        self.target = Some(target);
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Get the message id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the group, if any.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Get the group if it is present and not blank.
    #[must_use]
    pub fn routable_group(&self) -> Option<&str> {
        self.group.as_deref().filter(|g| !g.trim().is_empty())
    }

    /// Replace the group.
    pub fn set_group(&mut self, group: impl Into<String>) {
        self.group = Some(group.into());
    }

    /// Get the target address, if any.
    #[must_use]
    pub fn target(&self) -> Option<MessageAddress> {
        self.target
    }

    /// Replace the target address.
    pub fn set_target(&mut self, target: Option<MessageAddress>) {
        self.target = target;
    }

    /// Get the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get mutable access to the payload.
    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    /// Consume the message and return its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Get a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Get all headers.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Insert or replace a header.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Get the creation time.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Get the channel this message was sent from.
    #[must_use]
    pub fn source(&self) -> Option<ChannelId> {
        self.source
    }

    /// Record the channel this message was sent from.
    pub fn set_source(&mut self, source: Option<ChannelId>) {
        self.source = source;
    }

    /// Whether the message arrived from the network.
    #[must_use]
    pub fn is_from_network(&self) -> bool {
        self.source == Some(ChannelId::RELAY)
    }

    /// Get the network address the message was received from.
    #[must_use]
    pub fn sender(&self) -> Option<SocketAddr> {
        self.sender
    }

    /// Attach the network address the message was received from.
    pub fn set_sender(&mut self, sender: Option<SocketAddr>) {
        self.sender = sender;
    }
}
