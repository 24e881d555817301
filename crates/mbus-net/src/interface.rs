//! # Interface Resolution
//!
//! Picks the IPv4 address and netmask the bus broadcasts on.
//!
//! Order of preference:
//! 1. explicit address (and optional mask) from configuration
//! 2. first non-loopback IPv4 interface of the host
//! 3. the host name, resolved through the system resolver (mask `/24`)
//! 4. loopback `127.0.0.1/8`

use crate::error::NetError;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use tracing::{debug, warn};

const DEFAULT_HOST_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const LOOPBACK_MASK: Ipv4Addr = Ipv4Addr::new(255, 0, 0, 0);

/// Address and netmask of the interface the bus runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalInterface {
    /// Interface address.
    pub address: Ipv4Addr,
    /// Interface netmask.
    pub netmask: Ipv4Addr,
}

impl LocalInterface {
    /// Create from address and mask.
    #[must_use]
    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self { address, netmask }
    }

    /// Loopback interface.
    #[must_use]
    pub fn loopback() -> Self {
        Self::new(Ipv4Addr::LOCALHOST, LOOPBACK_MASK)
    }

    /// Subnet broadcast address, `address | !netmask`.
    #[must_use]
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !u32::from(self.netmask))
    }

    /// Resolve the interface to use.
    ///
    /// A configured mask without an address is ignored. A configured
    /// address without a mask uses the mask of the matching host interface,
    /// or `/24` if none matches.
    pub fn resolve(address: Option<Ipv4Addr>, netmask: Option<Ipv4Addr>) -> Result<Self, NetError> {
        if let Some(address) = address {
            if address.is_unspecified() {
                return Err(NetError::NoInterface(
                    "configured address 0.0.0.0 cannot be broadcast from".to_string(),
                ));
            }
            let netmask = netmask
                .or_else(|| host_mask_of(address))
                .unwrap_or(DEFAULT_HOST_MASK);
            return Ok(Self::new(address, netmask));
        }

        if let Some(found) = primary_interface() {
            debug!(address = %found.address, netmask = %found.netmask, "[mbus] Using primary interface");
            return Ok(found);
        }

        if let Some(address) = hostname_address() {
            debug!(address = %address, "[mbus] Using host name address");
            return Ok(Self::new(address, DEFAULT_HOST_MASK));
        }

        warn!("[mbus] No network interface found, falling back to loopback");
        Ok(Self::loopback())
    }
}

fn ipv4_interfaces() -> Vec<LocalInterface> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter_map(|iface| match iface.addr {
                if_addrs::IfAddr::V4(v4) => Some(LocalInterface::new(v4.ip, v4.netmask)),
                if_addrs::IfAddr::V6(_) => None,
            })
            .collect(),
        Err(e) => {
            debug!(error = %e, "[mbus] Interface enumeration failed");
            Vec::new()
        }
    }
}

fn primary_interface() -> Option<LocalInterface> {
    ipv4_interfaces()
        .into_iter()
        .find(|iface| !iface.address.is_loopback() && !iface.address.is_link_local())
}

fn host_mask_of(address: Ipv4Addr) -> Option<Ipv4Addr> {
    ipv4_interfaces()
        .into_iter()
        .find(|iface| iface.address == address)
        .map(|iface| iface.netmask)
}

fn hostname_address() -> Option<Ipv4Addr> {
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())?;

    (hostname.as_str(), 0)
        .to_socket_addrs()
        .ok()?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
            _ => None,
        })
}
