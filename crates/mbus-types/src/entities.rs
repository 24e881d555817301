//! # Core Entities
//!
//! Identifiers and addresses used to route messages between channels and
//! between bus instances.

use crate::errors::AddressParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of one running bus instance.
///
/// Generated once per bus and never reused within the process. Used to tell
/// "this node" apart in directed messages and in the remote-node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub i64);

impl EndpointId {
    /// Create an endpoint id from a raw value.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a channel, unique per endpoint for the lifetime of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub i32);

impl ChannelId {
    /// Wildcard: every channel at the addressed endpoint.
    pub const ALL: ChannelId = ChannelId(-1);

    /// Reserved id of the network-relay channel.
    ///
    /// Messages carrying this id as their source arrived from the network and
    /// are never relayed back onto it.
    pub const RELAY: ChannelId = ChannelId(0);

    /// First id handed out to application channels.
    pub const FIRST: ChannelId = ChannelId(1);

    /// Create a channel id from a raw value.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Whether this id addresses every channel at an endpoint.
    #[must_use]
    pub const fn is_all(self) -> bool {
        self.0 == Self::ALL.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Explicit destination of a directed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageAddress {
    /// The bus instance the message is addressed to.
    pub endpoint: EndpointId,
    /// The channel at that endpoint, or [`ChannelId::ALL`].
    pub channel: ChannelId,
}

impl MessageAddress {
    /// Address a single channel at an endpoint.
    #[must_use]
    pub const fn new(endpoint: EndpointId, channel: ChannelId) -> Self {
        Self { endpoint, channel }
    }

    /// Address every channel at an endpoint.
    #[must_use]
    pub const fn all_channels(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            channel: ChannelId::ALL,
        }
    }
}

impl fmt::Display for MessageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.channel)
    }
}

impl FromStr for MessageAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (endpoint, channel) = s
            .split_once(':')
            .ok_or_else(|| AddressParseError::Malformed(s.to_string()))?;
        let endpoint = endpoint
            .trim()
            .parse::<i64>()
            .map_err(|_| AddressParseError::InvalidEndpoint(endpoint.to_string()))?;
        let channel = channel
            .trim()
            .parse::<i32>()
            .map_err(|_| AddressParseError::InvalidChannel(channel.to_string()))?;
        Ok(Self::new(EndpointId(endpoint), ChannelId(channel)))
    }
}

/// Unix timestamp in milliseconds.
///
/// Values are clamped to [`Timestamp::MAX_REASONABLE`] so that arithmetic in
/// expiry checks can never overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Year 9999 in milliseconds.
    pub const MAX_REASONABLE: u64 = 253_402_300_799_000;

    /// Create a timestamp, clamping to `MAX_REASONABLE`.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self(millis.min(Self::MAX_REASONABLE))
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::from_millis(millis)
    }

    /// Get the underlying milliseconds value.
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add milliseconds (saturating at `MAX_REASONABLE`).
    #[must_use]
    pub fn add_millis(&self, millis: u64) -> Self {
        Self::from_millis(self.0.saturating_add(millis))
    }

    /// Milliseconds elapsed since `earlier` (0 if `earlier` is in the future).
    #[must_use]
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_wildcard() {
        assert!(ChannelId::ALL.is_all());
        assert!(!ChannelId::FIRST.is_all());
        assert!(!ChannelId::RELAY.is_all());
    }

    #[test]
    fn test_address_parse() {
        let addr: MessageAddress = "42:7".parse().unwrap();
        assert_eq!(addr, MessageAddress::new(EndpointId(42), ChannelId(7)));

        let all: MessageAddress = "42:-1".parse().unwrap();
        assert!(all.channel.is_all());
        assert_eq!(all.to_string(), "42:-1");
    }

    #[test]
    fn test_address_parse_errors() {
        assert!(matches!(
            "42".parse::<MessageAddress>(),
            Err(AddressParseError::Malformed(_))
        ));
        assert!(matches!(
            "x:1".parse::<MessageAddress>(),
            Err(AddressParseError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "1:y".parse::<MessageAddress>(),
            Err(AddressParseError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_timestamp_clamped() {
        let ts = Timestamp::from_millis(u64::MAX);
        assert_eq!(ts.as_millis(), Timestamp::MAX_REASONABLE);
        assert_eq!(ts.add_millis(10).as_millis(), Timestamp::MAX_REASONABLE);
    }

    #[test]
    fn test_timestamp_millis_since() {
        let earlier = Timestamp::from_millis(1_000);
        let later = Timestamp::from_millis(61_500);
        assert_eq!(later.millis_since(earlier), 60_500);
        assert_eq!(earlier.millis_since(later), 0);
    }
}
