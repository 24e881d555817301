//! # Broadcast Transport
//!
//! One UDP socket bound on the bus port with broadcast enabled. Published
//! messages go to the subnet broadcast address; every datagram received on
//! the port is decoded and either routed (data) or recorded (heartbeat).
//!
//! ## Heartbeats
//!
//! - Sent on activation, then every `heartbeat_interval_ms`.
//! - A heartbeat from a node not yet in the table triggers an immediate
//!   reply, so two nodes discover each other within one round trip.

use crate::error::NetError;
use crate::interface::LocalInterface;
use crate::membership::{Observation, RemoteNode, RemoteNodeTable};
use crate::ports::{InboundRouter, TimeSource};
use crate::transport::Transport;
use crate::wire::{self, Heartbeat, Packet, MAX_DATAGRAM};
use crate::{DEFAULT_BUS_PORT, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_RECV_BUFFER_BYTES};
use async_trait::async_trait;
use mbus_types::{EndpointId, Message, Timestamp};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

const NAME: &str = "broadcast";

// =============================================================================
// SOCKET
// =============================================================================

/// Bind a non-blocking UDP socket suitable for the bus port.
///
/// Enables address and port reuse so several bus instances (and the
/// `mbus-listen` tool) can share the port on one host, enables broadcast,
/// and asks for a receive buffer of at least `recv_buffer` bytes. A refused
/// buffer size is logged, not fatal.
pub fn bind_udp_socket(ip: Ipv4Addr, port: u16, recv_buffer: usize) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
        warn!(requested = recv_buffer, error = %e, "[mbus] Could not size UDP receive buffer");
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(ip, port)).into())?;
    Ok(socket.into())
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Settings for the broadcast transport.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Interface whose broadcast address is targeted.
    pub interface: LocalInterface,
    /// Bus UDP port.
    pub port: u16,
    /// Interval between heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Requested receive buffer size.
    pub recv_buffer_bytes: usize,
}

impl BroadcastConfig {
    /// Defaults for `interface`.
    #[must_use]
    pub fn new(interface: LocalInterface) -> Self {
        Self {
            interface,
            port: DEFAULT_BUS_PORT,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
        }
    }
}

// =============================================================================
// SHARED STATE
// =============================================================================

struct BroadcastShared {
    endpoint: EndpointId,
    ready: AtomicBool,
    queue_depth: AtomicUsize,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    bridge: RwLock<Option<SocketAddr>>,
    nodes: RemoteNodeTable,
    local_addr: SocketAddr,
    destination: SocketAddr,
    malformed: AtomicU64,
}

/// Application-side handle to the broadcast transport.
#[derive(Clone)]
pub struct BroadcastHandle {
    shared: Arc<BroadcastShared>,
}

impl BroadcastHandle {
    /// Queue `message` for broadcast.
    ///
    /// Encoding happens on the calling thread, so an oversized message
    /// fails here and never reaches the socket.
    pub fn publish(&self, message: &Message) -> Result<(), NetError> {
        let bytes = wire::encode_data(self.shared.endpoint, message)?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(NetError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM,
            });
        }
        self.shared.queue_depth.fetch_add(1, Ordering::SeqCst);
        if self.shared.outbound.send(bytes).is_err() {
            self.shared.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(NetError::NotActive(NAME));
        }
        Ok(())
    }

    /// Whether the transport is active on the I/O thread.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Datagrams waiting to be sent.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.shared.queue_depth.load(Ordering::SeqCst)
    }

    /// Live remote nodes.
    #[must_use]
    pub fn remote_nodes(&self) -> Vec<RemoteNode> {
        self.shared.nodes.snapshot()
    }

    /// The membership table this transport feeds.
    #[must_use]
    pub fn nodes(&self) -> &RemoteNodeTable {
        &self.shared.nodes
    }

    /// Set (or clear) the bridge address announced in heartbeats.
    pub fn set_bridge_addr(&self, addr: Option<SocketAddr>) {
        *self.shared.bridge.write() = addr;
    }

    /// Bridge address currently announced.
    #[must_use]
    pub fn bridge_addr(&self) -> Option<SocketAddr> {
        *self.shared.bridge.read()
    }

    /// Endpoint stamped on outbound packets.
    #[must_use]
    pub fn endpoint(&self) -> EndpointId {
        self.shared.endpoint
    }

    /// Address the socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Where published datagrams are sent.
    #[must_use]
    pub fn broadcast_addr(&self) -> SocketAddr {
        self.shared.destination
    }

    /// Datagrams dropped because they failed to decode.
    #[must_use]
    pub fn malformed_count(&self) -> u64 {
        self.shared.malformed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BroadcastHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHandle")
            .field("endpoint", &self.shared.endpoint)
            .field("local_addr", &self.shared.local_addr)
            .field("destination", &self.shared.destination)
            .field("ready", &self.is_ready())
            .finish()
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

enum Event {
    Datagram(io::Result<(usize, SocketAddr)>),
    Outbound(Vec<u8>),
    Idle,
}

/// UDP broadcast transport. Owned by the I/O service once staged.
pub struct BroadcastTransport {
    shared: Arc<BroadcastShared>,
    pending_socket: Option<std::net::UdpSocket>,
    socket: Option<UdpSocket>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    router: Arc<dyn InboundRouter>,
    time_source: Arc<dyn TimeSource>,
    heartbeat_interval_ms: u64,
    last_heartbeat: Option<Timestamp>,
    reply_pending: bool,
    buf: Vec<u8>,
}

impl BroadcastTransport {
    /// Bind the socket on the calling thread and build the transport and
    /// its handle.
    ///
    /// The socket binds the wildcard address so broadcasts are received;
    /// the configured interface only determines the destination.
    pub fn bind(
        config: &BroadcastConfig,
        nodes: RemoteNodeTable,
        router: Arc<dyn InboundRouter>,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<(Self, BroadcastHandle), NetError> {
        let socket = bind_udp_socket(Ipv4Addr::UNSPECIFIED, config.port, config.recv_buffer_bytes)?;
        let local_addr = socket.local_addr()?;
        let destination = SocketAddr::V4(SocketAddrV4::new(
            config.interface.broadcast(),
            local_addr.port(),
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(BroadcastShared {
            endpoint: nodes.local_endpoint(),
            ready: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            outbound: tx,
            bridge: RwLock::new(None),
            nodes,
            local_addr,
            destination,
            malformed: AtomicU64::new(0),
        });

        debug!(
            local = %local_addr,
            broadcast = %destination,
            "[mbus] Broadcast socket bound"
        );

        let transport = Self {
            shared: shared.clone(),
            pending_socket: Some(socket),
            socket: None,
            outbound: rx,
            router,
            time_source,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            last_heartbeat: None,
            reply_pending: false,
            buf: vec![0u8; MAX_DATAGRAM],
        };
        Ok((transport, BroadcastHandle { shared }))
    }

    fn handle_datagram(&mut self, len: usize, from: SocketAddr) {
        let packet = match Packet::decode(&self.buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                self.shared.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(from = %from, len, error = %e, "[mbus] Dropping malformed datagram");
                return;
            }
        };

        match packet {
            Packet::Data(data) => {
                if data.origin == self.shared.endpoint {
                    return;
                }
                let mut message = data.message;
                message.set_sender(Some(from));
                trace!(from = %from, id = %message.id(), "[mbus] Data datagram");
                self.router.route_inbound(message);
            }
            Packet::Heartbeat(heartbeat) => {
                if self.shared.nodes.observe(&heartbeat, from) == Observation::Joined {
                    self.reply_pending = true;
                }
            }
            Packet::Ack(_) => {
                debug!(from = %from, "[mbus] Ignoring ACK on broadcast socket");
            }
        }
    }

    fn heartbeat_due(&self, now: Timestamp) -> bool {
        self.reply_pending
            || self
                .last_heartbeat
                .map_or(true, |last| now.millis_since(last) >= self.heartbeat_interval_ms)
    }

    fn send_heartbeat(&mut self, now: Timestamp) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let heartbeat = Heartbeat {
            endpoint: self.shared.endpoint,
            bridge: *self.shared.bridge.read(),
            timestamp: now,
        };
        match Packet::Heartbeat(heartbeat).encode() {
            Ok(bytes) => {
                if let Err(e) = socket.try_send_to(&bytes, self.shared.destination) {
                    debug!(error = %e, "[mbus] Heartbeat send failed");
                    return;
                }
                self.last_heartbeat = Some(now);
                self.reply_pending = false;
            }
            Err(e) => warn!(error = %e, "[mbus] Heartbeat encode failed"),
        }
    }
}

#[async_trait]
impl Transport for BroadcastTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn activate(&mut self) -> Result<(), NetError> {
        let std_socket = self.pending_socket.take().ok_or(NetError::NotActive(NAME))?;
        self.socket = Some(UdpSocket::from_std(std_socket)?);
        self.shared.ready.store(true, Ordering::SeqCst);
        info!(
            endpoint = %self.shared.endpoint,
            broadcast = %self.shared.destination,
            "[mbus] Broadcast transport active"
        );
        let now = self.time_source.now();
        self.send_heartbeat(now);
        Ok(())
    }

    async fn poll(&mut self, wait: Duration) -> Result<(), NetError> {
        let event = {
            let socket = self.socket.as_ref().ok_or(NetError::NotActive(NAME))?;
            tokio::select! {
                received = socket.recv_from(&mut self.buf) => Event::Datagram(received),
                Some(bytes) = self.outbound.recv() => Event::Outbound(bytes),
                _ = tokio::time::sleep(wait) => Event::Idle,
            }
        };

        match event {
            Event::Datagram(received) => {
                let (len, from) = received?;
                self.handle_datagram(len, from);
            }
            Event::Outbound(bytes) => {
                self.shared.queue_depth.fetch_sub(1, Ordering::SeqCst);
                let socket = self.socket.as_ref().ok_or(NetError::NotActive(NAME))?;
                socket.send_to(&bytes, self.shared.destination).await?;
            }
            Event::Idle => {}
        }
        Ok(())
    }

    fn housekeeping(&mut self) {
        let now = self.time_source.now();
        if self.heartbeat_due(now) {
            self.send_heartbeat(now);
        }
        self.shared.nodes.prune();
    }

    fn release(&mut self) {
        self.shared.ready.store(false, Ordering::SeqCst);
        self.socket = None;
        self.pending_socket = None;
        self.outbound.close();
        while self.outbound.try_recv().is_ok() {}
        self.shared.queue_depth.store(0, Ordering::SeqCst);
        info!(endpoint = %self.shared.endpoint, "[mbus] Broadcast transport released");
    }
}
