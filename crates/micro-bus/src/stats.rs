//! Bus-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages accepted by `send` (local and relayed).
    pub sent: u64,
    /// Local deliveries made.
    pub delivered: u64,
    /// Directed messages whose target channel did not exist.
    pub undeliverable: u64,
    /// Messages received from other nodes.
    pub received_from_network: u64,
    /// Messages handed to the broadcast transport.
    pub relayed_to_network: u64,
    /// Messages the broadcast transport refused; still delivered locally.
    pub relay_failed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    sent: AtomicU64,
    delivered: AtomicU64,
    undeliverable: AtomicU64,
    received_from_network: AtomicU64,
    relayed_to_network: AtomicU64,
    relay_failed: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_undeliverable(&self) {
        self.undeliverable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received_from_network.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_relayed(&self) {
        self.relayed_to_network.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_relay_failed(&self) {
        self.relay_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BusStats {
        BusStats {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            undeliverable: self.undeliverable.load(Ordering::Relaxed),
            received_from_network: self.received_from_network.load(Ordering::Relaxed),
            relayed_to_network: self.relayed_to_network.load(Ordering::Relaxed),
            relay_failed: self.relay_failed.load(Ordering::Relaxed),
        }
    }
}
