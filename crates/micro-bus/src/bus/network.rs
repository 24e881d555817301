//! Network side of the facade: `open()` and the inbound router.

use super::{BusShared, MicroBus};
use crate::error::BusError;
use mbus_net::{
    BridgeConfig, BridgeHandle, BridgeTransport, BroadcastConfig, BroadcastTransport,
    InboundRouter, LocalInterface,
};
use mbus_types::{ChannelId, Message};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Routes network arrivals into the local registry.
///
/// Holds the bus weakly so the transports never keep a dropped bus alive.
pub(crate) struct NetworkInbound {
    bus: Weak<BusShared>,
}

impl NetworkInbound {
    pub(super) fn new(bus: Weak<BusShared>) -> Self {
        Self { bus }
    }
}

impl InboundRouter for NetworkInbound {
    fn route_inbound(&self, mut message: Message) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        if bus.shut_down.load(Ordering::SeqCst) {
            debug!(id = %message.id(), "[mbus] Dropping network message after shutdown");
            return;
        }
        message.set_source(Some(ChannelId::RELAY));
        bus.stats.record_received();
        bus.route(message);
    }
}

impl MicroBus {
    /// Bind the transports and start the I/O thread. Idempotent.
    ///
    /// After [`MicroBus::close`], only the bridge is rebound. On error the
    /// bus stays local-only.
    pub fn open(&self) -> Result<(), BusError> {
        let shared = &self.shared;
        let _guard = shared.open_lock.lock();
        self.ensure_running()?;

        let relay_up = shared.relay.read().is_some();
        let bridge_up = shared.bridge.lock().is_some();
        if relay_up && bridge_up {
            return Ok(());
        }

        shared.config.validate()?;
        let interface = match *shared.interface.read() {
            Some(interface) => interface,
            None => LocalInterface::resolve(shared.config.network.address, shared.config.network.netmask)?,
        };
        let router: Arc<dyn InboundRouter> = Arc::new(NetworkInbound::new(Arc::downgrade(shared)));

        if relay_up {
            let (bridge, handle) = self.bind_bridge(interface, router)?;
            shared.io.add(Box::new(bridge))?;
            self.install_bridge(handle);
            return Ok(());
        }

        let broadcast_config = BroadcastConfig {
            interface,
            port: shared.config.network.port,
            heartbeat_interval_ms: shared.config.timing.heartbeat_interval_ms,
            recv_buffer_bytes: shared.config.network.recv_buffer_bytes,
        };
        let (broadcast, relay) = BroadcastTransport::bind(
            &broadcast_config,
            shared.nodes.clone(),
            router.clone(),
            shared.time_source.clone(),
        )?;
        let (bridge, bridge_handle) = self.bind_bridge(interface, router)?;
        relay.set_bridge_addr(Some(bridge_handle.advertised_addr()));

        shared.io.stage(Box::new(broadcast))?;
        shared.io.stage(Box::new(bridge))?;
        shared.io.start()?;

        info!(
            endpoint = %shared.endpoint,
            address = %interface.address,
            broadcast = %relay.broadcast_addr(),
            bridge = %bridge_handle.advertised_addr(),
            "[mbus] Bus opened"
        );
        *shared.interface.write() = Some(interface);
        *shared.relay.write() = Some(relay);
        *shared.bridge.lock() = Some(bridge_handle);
        Ok(())
    }

    fn bind_bridge(
        &self,
        interface: LocalInterface,
        router: Arc<dyn InboundRouter>,
    ) -> Result<(BridgeTransport, BridgeHandle), BusError> {
        let config = BridgeConfig {
            port: self.shared.config.network.bridge_port,
            advertise_ip: interface.address,
            idle_timeout: Duration::from_millis(self.shared.config.timing.bridge_idle_ms),
        };
        Ok(BridgeTransport::bind(config, self.shared.acl.clone(), router)?)
    }

    fn install_bridge(&self, handle: BridgeHandle) {
        if let Some(relay) = self.shared.relay.read().as_ref() {
            relay.set_bridge_addr(Some(handle.advertised_addr()));
        }
        info!(bridge = %handle.advertised_addr(), "[mbus] Bridge reopened");
        *self.shared.bridge.lock() = Some(handle);
    }
}
