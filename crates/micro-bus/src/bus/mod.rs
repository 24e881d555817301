//! # Bus Facade
//!
//! [`MicroBus`] owns the channel registry, the network transports and the
//! I/O service. Every clone of a `MicroBus` (and every [`Channel`]) shares
//! the same state; the I/O service is destroyed when the last of them is
//! dropped, or earlier by [`MicroBus::shutdown`].

mod network;
mod routing;

use crate::channel::registry::ChannelRegistry;
use crate::channel::{Channel, ChannelInner, Sink};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::lifecycle::Lifecycle;
use crate::stats::{BusStats, StatsCounters};
use mbus_net::{
    AccessControlList, AclEntry, BridgeHandle, BroadcastHandle, IoService, LocalInterface,
    NetError, NetworkSpec, RemoteNode, RemoteNodeTable, SystemTimeSource, TimeSource,
};
use mbus_types::{ChannelId, EndpointId, Message, MessageAddress};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// State shared by the facade, its channels and the inbound router.
pub(crate) struct BusShared {
    config: BusConfig,
    endpoint: EndpointId,
    registry: ChannelRegistry,
    next_channel_id: AtomicI32,
    relay: RwLock<Option<BroadcastHandle>>,
    bridge: Mutex<Option<BridgeHandle>>,
    interface: RwLock<Option<LocalInterface>>,
    open_lock: Mutex<()>,
    acl: AccessControlList,
    io: IoService,
    nodes: RemoteNodeTable,
    stats: StatsCounters,
    shut_down: AtomicBool,
    time_source: Arc<dyn TimeSource>,
}

impl BusShared {
    pub(crate) fn unregister(&self, id: ChannelId) {
        self.registry.remove(id);
    }

    fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timing.shutdown_timeout_ms)
    }
}

impl Drop for BusShared {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::SeqCst) {
            self.io.destroy(self.shutdown_timeout());
        }
    }
}

/// The bus facade.
#[derive(Clone)]
pub struct MicroBus {
    shared: Arc<BusShared>,
}

impl MicroBus {
    /// Create a bus. The endpoint id is generated now, so directed
    /// addressing works before [`MicroBus::open`].
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self::with_time_source(config, Arc::new(SystemTimeSource::new()))
    }

    /// Create a bus with an injected clock (used for membership expiry).
    #[must_use]
    pub fn with_time_source(config: BusConfig, time_source: Arc<dyn TimeSource>) -> Self {
        let endpoint = EndpointId(rand::thread_rng().gen_range(1..=i64::MAX));
        let nodes = RemoteNodeTable::new(endpoint, config.timing.expiry_ms, time_source.clone());
        let acl = AccessControlList::from_entries(config.acl.iter().copied());
        let io = IoService::new(Duration::from_millis(config.timing.poll_interval_ms.max(1)));

        info!(endpoint = %endpoint, "[mbus] Bus created");
        Self {
            shared: Arc::new(BusShared {
                config,
                endpoint,
                registry: ChannelRegistry::default(),
                next_channel_id: AtomicI32::new(ChannelId::FIRST.get()),
                relay: RwLock::new(None),
                bridge: Mutex::new(None),
                interface: RwLock::new(None),
                open_lock: Mutex::new(()),
                acl,
                io,
                nodes,
                stats: StatsCounters::default(),
                shut_down: AtomicBool::new(false),
                time_source,
            }),
        }
    }

    // =========================================================================
    // CHANNELS
    // =========================================================================

    /// Register a channel. With `sink`, deliveries invoke it; without, they
    /// are queued for `recv`. After shutdown the returned channel is
    /// already closed.
    pub fn create_channel(&self, sink: Option<Sink>) -> Channel {
        let id = ChannelId(self.shared.next_channel_id.fetch_add(1, Ordering::SeqCst));
        let inner = Arc::new(ChannelInner::new(id, self.shared.endpoint, sink));
        if self.is_shut_down() {
            inner.close();
            return Channel::new(inner, self.shared.clone());
        }

        self.shared.registry.register(inner.clone());
        // shutdown() may have drained the registry between the check and
        // the registration
        if self.is_shut_down() {
            inner.close();
            self.shared.registry.remove(id);
        }
        Channel::new(inner, self.shared.clone())
    }

    /// Register a queue-backed channel.
    pub fn channel(&self) -> Channel {
        self.create_channel(None)
    }

    /// Register a sink-backed channel.
    pub fn channel_with_sink<F>(&self, sink: F) -> Channel
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.create_channel(Some(Arc::new(sink)))
    }

    /// Number of registered channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.shared.registry.len()
    }

    // =========================================================================
    // SENDING
    // =========================================================================

    /// Publish `message`, with `group` overriding the message's own group
    /// when it is not blank. Returns the number of local deliveries.
    pub fn send(&self, message: Message, group: Option<&str>) -> Result<usize, BusError> {
        self.shared.submit(message, group, None)
    }

    /// Deliver `message` over the bridge to `endpoint` and wait for its
    /// acknowledgement, using the configured delivery timeout.
    pub fn send_reliable(&self, message: Message, endpoint: EndpointId) -> Result<(), BusError> {
        let timeout = Duration::from_millis(self.shared.config.timing.delivery_timeout_ms);
        self.send_reliable_timeout(message, endpoint, timeout)
    }

    /// [`MicroBus::send_reliable`] with an explicit timeout.
    ///
    /// A message without a target is addressed to every channel at
    /// `endpoint`. Must not be called from a sink running on the I/O thread.
    pub fn send_reliable_timeout(
        &self,
        mut message: Message,
        endpoint: EndpointId,
        timeout: Duration,
    ) -> Result<(), BusError> {
        self.ensure_running()?;
        let node = self
            .shared
            .nodes
            .get(endpoint)
            .ok_or(BusError::UnknownEndpoint(endpoint))?;
        let peer = node
            .bridge
            .ok_or_else(|| BusError::Delivery(format!("endpoint {endpoint} advertises no bridge")))?;
        let bridge = self
            .shared
            .bridge
            .lock()
            .clone()
            .ok_or(BusError::Net(NetError::BridgeUnavailable))?;

        if message.target().is_none() {
            message.set_target(Some(MessageAddress::all_channels(endpoint)));
        }
        message.set_source(None);
        self.shared.stats.record_sent();

        bridge
            .deliver(peer, self.shared.endpoint, &message, timeout)
            .map_err(|e| match e {
                NetError::OnIoThread | NetError::BridgeUnavailable | NetError::Packet(_) => BusError::Net(e),
                other => BusError::Delivery(other.to_string()),
            })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Close the bridge transport. Local routing and the broadcast
    /// transport stay up; `open()` brings the bridge back.
    pub fn close(&self) {
        let _guard = self.shared.open_lock.lock();
        let Some(bridge) = self.shared.bridge.lock().take() else {
            return;
        };
        if let Some(relay) = self.shared.relay.read().as_ref() {
            relay.set_bridge_addr(None);
        }
        if let Err(e) = self.shared.io.remove("bridge") {
            warn!(error = %e, "[mbus] Bridge removal failed");
        }
        info!(bridge = %bridge.advertised_addr(), "[mbus] Bridge closed");
    }

    /// Close every channel and stop the network. Terminal and idempotent.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = self.shared.open_lock.lock();

        let channels = self.shared.registry.drain();
        let count = channels.len();
        for channel in channels {
            channel.close();
        }

        self.shared.relay.write().take();
        self.shared.bridge.lock().take();
        if !self.shared.io.destroy(self.shared.shutdown_timeout()) {
            warn!("[mbus] I/O service did not stop within the shutdown timeout");
        }
        info!(endpoint = %self.shared.endpoint, channels = count, "[mbus] Bus shut down");
    }

    /// Whether [`MicroBus::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), BusError> {
        if self.is_shut_down() {
            Err(BusError::IllegalState("bus has been shut down".into()))
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // DIAGNOSTICS
    // =========================================================================

    /// This bus's endpoint id.
    #[must_use]
    pub fn endpoint_id(&self) -> EndpointId {
        self.shared.endpoint
    }

    /// Whether `open()` succeeded and the bus has not been shut down.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.relay.read().is_some()
    }

    /// Whether the broadcast transport is active on the I/O thread.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared
            .relay
            .read()
            .as_ref()
            .is_some_and(BroadcastHandle::is_ready)
    }

    /// Datagrams waiting to be broadcast.
    #[must_use]
    pub fn outbound_queue_depth(&self) -> usize {
        self.shared
            .relay
            .read()
            .as_ref()
            .map_or(0, BroadcastHandle::queue_depth)
    }

    /// Live remote nodes.
    #[must_use]
    pub fn remote_nodes(&self) -> Vec<RemoteNode> {
        self.shared.nodes.snapshot()
    }

    /// Bridge address advertised to other nodes, while the bridge is up.
    #[must_use]
    pub fn bridge_addr(&self) -> Option<SocketAddr> {
        self.shared
            .bridge
            .lock()
            .as_ref()
            .map(BridgeHandle::advertised_addr)
    }

    /// Interface resolved by `open()`.
    #[must_use]
    pub fn local_interface(&self) -> Option<LocalInterface> {
        *self.shared.interface.read()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.shared.stats.snapshot()
    }

    /// The bridge ACL. Changes apply to the next accepted connection.
    #[must_use]
    pub fn acl(&self) -> &AccessControlList {
        &self.shared.acl
    }

    /// Parse `network` and append an ACL entry.
    pub fn add_acl_entry(&self, network: &str, allow: bool) -> Result<(), BusError> {
        let network: NetworkSpec = network
            .parse()
            .map_err(|e| BusError::InvalidArgument(format!("{e}")))?;
        self.shared.acl.add(AclEntry { network, allow });
        Ok(())
    }
}

impl Lifecycle for MicroBus {
    fn shutdown(&self) {
        MicroBus::shutdown(self);
    }

    fn name(&self) -> &str {
        "micro-bus"
    }
}

impl std::fmt::Debug for MicroBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroBus")
            .field("endpoint", &self.shared.endpoint)
            .field("channels", &self.channel_count())
            .field("open", &self.is_open())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
