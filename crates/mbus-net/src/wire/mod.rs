//! # Wire Format
//!
//! Every datagram and every bridge frame carries one `Packet`:
//!
//! ```text
//! ┌──────┬──────┬─────────┬──────┬──────────────────────┐
//! │ 'M'  │ 'B'  │ version │ type │ bincode body         │
//! └──────┴──────┴─────────┴──────┴──────────────────────┘
//!    0      1       2        3      4..
//! ```
//!
//! Bridge connections prefix each packet with a big-endian `u32` length
//! (see [`frame`]). There is no compatibility across versions: a packet
//! with any other version byte is rejected.

pub mod frame;

use mbus_types::{EndpointId, Message, Timestamp};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use uuid::Uuid;

/// Packet magic.
pub const MAGIC: [u8; 2] = *b"MB";

/// Current wire version.
pub const WIRE_VERSION: u8 = 1;

/// Length of the fixed header.
pub const HEADER_LEN: usize = 4;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest bridge frame accepted (16 MiB).
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors encoding or decoding packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Fewer bytes than the fixed header.
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    /// First two bytes are not `MB`.
    #[error("Bad packet magic")]
    BadMagic,

    /// Version byte differs from [`WIRE_VERSION`].
    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    /// Type byte is not a known [`PacketType`].
    #[error("Unknown packet type: {0:#04x}")]
    UnknownType(u8),

    /// Frame length exceeds the limit.
    #[error("Packet too large: {size} bytes (max {max})")]
    TooLarge {
        /// Announced or actual size.
        size: usize,
        /// Limit that was exceeded.
        max: usize,
    },

    /// Body failed to (de)serialize.
    #[error("Codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for PacketError {
    fn from(err: bincode::Error) -> Self {
        PacketError::Codec(err.to_string())
    }
}

// =============================================================================
// PACKET TYPES
// =============================================================================

/// Packet type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// A published message.
    Data = 0x01,
    /// Membership announcement.
    Heartbeat = 0x02,
    /// Bridge delivery acknowledgement.
    Ack = 0x03,
}

impl PacketType {
    /// Human-readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Data => "DATA",
            PacketType::Heartbeat => "HEARTBEAT",
            PacketType::Ack => "ACK",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketType::Data),
            0x02 => Ok(PacketType::Heartbeat),
            0x03 => Ok(PacketType::Ack),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

/// Body of a `Data` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPacket {
    /// Endpoint that published the message.
    pub origin: EndpointId,
    /// The message itself (transient fields are not carried).
    pub message: Message,
}

/// Same layout as [`DataPacket`], borrowing the message for encoding.
#[derive(Serialize)]
struct DataRef<'a> {
    origin: EndpointId,
    message: &'a Message,
}

/// Body of a `Heartbeat` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Announcing endpoint.
    pub endpoint: EndpointId,
    /// Bridge listener address, if the bridge is up.
    pub bridge: Option<SocketAddr>,
    /// Sender's clock at emission.
    pub timestamp: Timestamp,
}

/// Body of an `Ack` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Id of the acknowledged message.
    pub message_id: Uuid,
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A published message.
    Data(DataPacket),
    /// Membership announcement.
    Heartbeat(Heartbeat),
    /// Bridge delivery acknowledgement.
    Ack(Ack),
}

impl Packet {
    /// The packet's type byte.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Data(_) => PacketType::Data,
            Packet::Heartbeat(_) => PacketType::Heartbeat,
            Packet::Ack(_) => PacketType::Ack,
        }
    }

    /// Encode header and body.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let ty = self.packet_type();
        match self {
            Packet::Data(body) => encode_with(ty, body),
            Packet::Heartbeat(body) => encode_with(ty, body),
            Packet::Ack(body) => encode_with(ty, body),
        }
    }

    /// Decode a packet, validating the header.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let ty = peek_type(bytes)?;
        let body = &bytes[HEADER_LEN..];
        let packet = match ty {
            PacketType::Data => Packet::Data(bincode::deserialize(body)?),
            PacketType::Heartbeat => Packet::Heartbeat(bincode::deserialize(body)?),
            PacketType::Ack => Packet::Ack(bincode::deserialize(body)?),
        };
        Ok(packet)
    }
}

/// Encode a `Data` packet without cloning the message.
pub fn encode_data(origin: EndpointId, message: &Message) -> Result<Vec<u8>, PacketError> {
    encode_with(PacketType::Data, &DataRef { origin, message })
}

/// Validate the header and return the packet type, without decoding the body.
pub fn peek_type(bytes: &[u8]) -> Result<PacketType, PacketError> {
    if bytes.len() < HEADER_LEN {
        return Err(PacketError::TooShort(bytes.len()));
    }
    if bytes[..2] != MAGIC {
        return Err(PacketError::BadMagic);
    }
    if bytes[2] != WIRE_VERSION {
        return Err(PacketError::UnsupportedVersion(bytes[2]));
    }
    PacketType::try_from(bytes[3])
}

fn encode_with<T: Serialize>(ty: PacketType, body: &T) -> Result<Vec<u8>, PacketError> {
    let size = bincode::serialized_size(body)? as usize;
    let mut out = Vec::with_capacity(HEADER_LEN + size);
    out.extend_from_slice(&MAGIC);
    out.push(WIRE_VERSION);
    out.push(ty as u8);
    bincode::serialize_into(&mut out, body)?;
    Ok(out)
}
