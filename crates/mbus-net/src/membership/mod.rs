//! # Membership
//!
//! Table of remote bus instances learned from heartbeats.
//!
//! ## Lifecycle
//!
//! - A heartbeat from an unknown endpoint inserts a `RemoteNode`
//!   ([`Observation::Joined`]).
//! - A heartbeat from a known endpoint refreshes `last_seen`, address and
//!   bridge address ([`Observation::Refreshed`]).
//! - A node is purged once `now - last_seen > expiry`. Purging is lazy: it
//!   happens on every read of the table and on every transport housekeeping
//!   pass, so no dedicated timer exists.
//! - The local endpoint is never recorded.

use crate::ports::TimeSource;
use crate::wire::Heartbeat;
use mbus_types::{EndpointId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// A remote bus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteNode {
    /// Remote endpoint id.
    pub endpoint: EndpointId,
    /// Address the last heartbeat came from.
    pub address: SocketAddr,
    /// Advertised bridge listener, if the remote bridge is up.
    pub bridge: Option<SocketAddr>,
    /// Local time the last heartbeat was received.
    pub last_seen: Timestamp,
}

/// Outcome of recording a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The endpoint was not known before.
    Joined,
    /// A known endpoint was refreshed.
    Refreshed,
    /// The heartbeat came from this node.
    IgnoredSelf,
}

struct TableInner {
    local: EndpointId,
    expiry_ms: u64,
    nodes: RwLock<HashMap<EndpointId, RemoteNode>>,
    time_source: Arc<dyn TimeSource>,
}

/// Shared, internally synchronized remote-node table.
#[derive(Clone)]
pub struct RemoteNodeTable {
    inner: Arc<TableInner>,
}

impl RemoteNodeTable {
    /// Create an empty table for `local`.
    #[must_use]
    pub fn new(local: EndpointId, expiry_ms: u64, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            inner: Arc::new(TableInner {
                local,
                expiry_ms,
                nodes: RwLock::new(HashMap::new()),
                time_source,
            }),
        }
    }

    /// The endpoint this table belongs to.
    #[must_use]
    pub fn local_endpoint(&self) -> EndpointId {
        self.inner.local
    }

    /// Configured expiry in milliseconds.
    #[must_use]
    pub fn expiry_ms(&self) -> u64 {
        self.inner.expiry_ms
    }

    /// Record a heartbeat received from `from`.
    ///
    /// An unspecified bridge IP (`0.0.0.0`) is replaced with the sender's IP,
    /// since a node only knows its wildcard bind address.
    pub fn observe(&self, heartbeat: &Heartbeat, from: SocketAddr) -> Observation {
        if heartbeat.endpoint == self.inner.local {
            return Observation::IgnoredSelf;
        }

        let bridge = heartbeat.bridge.map(|mut addr| {
            if addr.ip().is_unspecified() {
                addr.set_ip(from.ip());
            }
            addr
        });
        let node = RemoteNode {
            endpoint: heartbeat.endpoint,
            address: from,
            bridge,
            last_seen: self.inner.time_source.now(),
        };

        let previous = self.inner.nodes.write().insert(node.endpoint, node);
        match previous {
            None => {
                info!(endpoint = %node.endpoint, address = %from, "[mbus] Remote node joined");
                Observation::Joined
            }
            Some(_) => Observation::Refreshed,
        }
    }

    /// Remove expired nodes. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = self.inner.time_source.now();
        let expiry = self.inner.expiry_ms;
        let mut nodes = self.inner.nodes.write();
        let before = nodes.len();
        nodes.retain(|endpoint, node| {
            let alive = now.millis_since(node.last_seen) <= expiry;
            if !alive {
                debug!(endpoint = %endpoint, "[mbus] Remote node expired");
            }
            alive
        });
        before - nodes.len()
    }

    /// Live nodes, after pruning. Order is unspecified.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RemoteNode> {
        self.prune();
        self.inner.nodes.read().values().copied().collect()
    }

    /// Look up one live node.
    #[must_use]
    pub fn get(&self, endpoint: EndpointId) -> Option<RemoteNode> {
        self.prune();
        self.inner.nodes.read().get(&endpoint).copied()
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prune();
        self.inner.nodes.read().len()
    }

    /// Whether no live node is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every node.
    pub fn clear(&self) {
        self.inner.nodes.write().clear();
    }
}

impl std::fmt::Debug for RemoteNodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNodeTable")
            .field("local", &self.inner.local)
            .field("expiry_ms", &self.inner.expiry_ms)
            .field("nodes", &self.inner.nodes.read().len())
            .finish()
    }
}
