//! # Integration Tests
//!
//! Shared fixtures for tests that run real bus instances.

pub mod bridge;
pub mod local_routing;
pub mod network;

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use mbus_net::bind_udp_socket;
use micro_bus::{BusConfig, MicroBus};
use rand::Rng;

// =============================================================================
// TEST FIXTURES
// =============================================================================

/// Loopback broadcast address used by every network fixture.
pub const LOOPBACK_BROADCAST: Ipv4Addr = Ipv4Addr::new(127, 255, 255, 255);

/// A random high UDP port, so concurrent tests do not share a bus.
pub fn random_port() -> u16 {
    rand::thread_rng().gen_range(20_000..60_000)
}

/// Configuration for a bus on the loopback subnet with fast timers.
pub fn loopback_config(port: u16) -> BusConfig {
    let mut config = BusConfig::default();
    config.network.address = Some(Ipv4Addr::LOCALHOST);
    config.network.netmask = Some(Ipv4Addr::new(255, 0, 0, 0));
    config.network.port = port;
    config.network.bridge_port = 0;
    config.timing.heartbeat_interval_ms = 100;
    config.timing.poll_interval_ms = 20;
    config.timing.expiry_ms = 5_000;
    config.timing.shutdown_timeout_ms = 2_000;
    config.timing.delivery_timeout_ms = 2_000;
    config
}

/// Open a bus on the loopback subnet.
pub fn open_loopback_bus(port: u16) -> MicroBus {
    let bus = MicroBus::new(loopback_config(port));
    bus.open().expect("open on loopback");
    bus
}

/// Whether a datagram sent to the loopback broadcast address reaches a
/// socket bound the way the bus binds. Sandboxed hosts sometimes lack the
/// loopback broadcast route.
pub fn loopback_broadcast_available() -> bool {
    let port = random_port();
    let Ok(receiver) = bind_udp_socket(Ipv4Addr::UNSPECIFIED, port, 64 * 1024) else {
        return false;
    };
    if receiver.set_nonblocking(false).is_err()
        || receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .is_err()
    {
        return false;
    }

    let Ok(sender) = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)) else {
        return false;
    };
    if sender.set_broadcast(true).is_err() {
        return false;
    }
    if sender
        .send_to(b"probe", SocketAddrV4::new(LOOPBACK_BROADCAST, port))
        .is_err()
    {
        return false;
    }

    let mut buf = [0u8; 16];
    matches!(receiver.recv_from(&mut buf), Ok((5, _)))
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Open two buses on the same port and wait until each sees the other.
/// Returns `None` when loopback broadcast is unavailable.
pub fn connected_pair() -> Option<(MicroBus, MicroBus)> {
    if !loopback_broadcast_available() {
        eprintln!("loopback broadcast unavailable; skipping");
        return None;
    }
    let port = random_port();
    let a = open_loopback_bus(port);
    let b = open_loopback_bus(port);

    let a_id = a.endpoint_id();
    let b_id = b.endpoint_id();
    let discovered = wait_until(Duration::from_secs(5), || {
        a.remote_nodes().iter().any(|n| n.endpoint == b_id)
            && b.remote_nodes().iter().any(|n| n.endpoint == a_id)
    });
    assert!(discovered, "buses did not discover each other");
    Some((a, b))
}
