use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

/// Errors parsing ACL text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclParseError {
    /// The address part is not an IP address.
    #[error("Invalid network address: {0}")]
    InvalidAddress(String),

    /// The prefix length is not a number or is too long for the family.
    #[error("Invalid prefix length {prefix} for {address}")]
    InvalidPrefix {
        /// Address part as written.
        address: String,
        /// Prefix part as written.
        prefix: String,
    },

    /// The entry does not start with `allow:` or `deny:`.
    #[error("Invalid ACL entry (expected allow:<net> or deny:<net>): {0}")]
    InvalidEntry(String),
}

/// An IP network: base address plus prefix length.
///
/// The base address is stored with host bits cleared, so
/// `192.168.1.77/24` and `192.168.1.0/24` are the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkSpec {
    network: IpAddr,
    prefix: u8,
}

impl NetworkSpec {
    /// Create a network, masking host bits and clamping the prefix.
    #[must_use]
    pub fn new(address: IpAddr, prefix: u8) -> Self {
        match address {
            IpAddr::V4(v4) => {
                let prefix = prefix.min(32);
                let masked = u32::from(v4) & v4_mask(prefix);
                Self {
                    network: IpAddr::V4(Ipv4Addr::from(masked)),
                    prefix,
                }
            }
            IpAddr::V6(v6) => {
                let prefix = prefix.min(128);
                let masked = u128::from(v6) & v6_mask(prefix);
                Self {
                    network: IpAddr::V6(Ipv6Addr::from(masked)),
                    prefix,
                }
            }
        }
    }

    /// A network containing exactly one host.
    #[must_use]
    pub fn host(address: IpAddr) -> Self {
        let prefix = if address.is_ipv4() { 32 } else { 128 };
        Self::new(address, prefix)
    }

    /// Base address with host bits cleared.
    #[must_use]
    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// Prefix length in bits.
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether `address` lies inside this network.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are compared as IPv4.
    /// Addresses of the other family never match.
    #[must_use]
    pub fn contains(&self, address: IpAddr) -> bool {
        match (self.network, normalize(address)) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = v4_mask(self.prefix);
                u32::from(addr) & mask == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = v6_mask(self.prefix);
                u128::from(addr) & mask == u128::from(net)
            }
            _ => false,
        }
    }
}

impl fmt::Display for NetworkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for NetworkSpec {
    type Err = AclParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (address_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a.trim(), Some(p.trim())),
            None => (s, None),
        };

        let address: IpAddr = address_part
            .parse()
            .map_err(|_| AclParseError::InvalidAddress(address_part.to_string()))?;
        let max = if address.is_ipv4() { 32 } else { 128 };

        let prefix = match prefix_part {
            None => max,
            Some(p) => match p.parse::<u8>() {
                Ok(len) if len <= max => len,
                _ => {
                    return Err(AclParseError::InvalidPrefix {
                        address: address_part.to_string(),
                        prefix: p.to_string(),
                    })
                }
            },
        };

        Ok(Self::new(address, prefix))
    }
}

fn normalize(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}
