//! # Bridge Transport
//!
//! TCP listener for point-to-point delivery between bus instances.
//!
//! ## Inbound
//!
//! The peer address of every accepted connection is checked against the
//! ACL before anything is read. Denied connections are dropped at once.
//! Allowed connections carry length-prefixed packets; each `Data` packet is
//! routed locally and answered with an `Ack` carrying the message id.
//!
//! ## Outbound
//!
//! [`BridgeHandle::deliver`] hands a frame to the I/O thread, which
//! connects to the peer's bridge, writes the frame and waits for the
//! matching `Ack`. The caller blocks until the outcome is known or the
//! timeout elapses.

use crate::acl::AccessControlList;
use crate::error::NetError;
use crate::ports::InboundRouter;
use crate::service::is_io_thread;
use crate::transport::Transport;
use crate::wire::frame::{read_frame, write_frame};
use crate::wire::{self, Ack, Packet};
use crate::DEFAULT_BRIDGE_IDLE_MS;
use async_trait::async_trait;
use mbus_types::{EndpointId, Message};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

const NAME: &str = "bridge";

/// Extra time the caller waits beyond the delivery timeout, so the I/O
/// thread's own timeout is what normally reports a slow peer.
const REPLY_GRACE: Duration = Duration::from_millis(500);

/// Settings for the bridge transport.
#[derive(Debug, Clone, Copy)]
pub struct BridgeConfig {
    /// Listener port; `0` picks an ephemeral port.
    pub port: u16,
    /// IP advertised to other nodes in heartbeats.
    pub advertise_ip: Ipv4Addr,
    /// Silence after which an accepted connection is closed.
    pub idle_timeout: Duration,
}

impl BridgeConfig {
    /// Ephemeral listener advertised on `advertise_ip`.
    #[must_use]
    pub fn new(advertise_ip: Ipv4Addr) -> Self {
        Self {
            port: 0,
            advertise_ip,
            idle_timeout: Duration::from_millis(DEFAULT_BRIDGE_IDLE_MS),
        }
    }
}

enum BridgeCommand {
    Deliver {
        peer: SocketAddr,
        frame: Vec<u8>,
        message_id: Uuid,
        timeout: Duration,
        reply: SyncSender<Result<(), NetError>>,
    },
}

struct BridgeShared {
    active: AtomicBool,
    commands: mpsc::UnboundedSender<BridgeCommand>,
    local_addr: SocketAddr,
    advertised: SocketAddr,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Application-side handle to the bridge transport.
#[derive(Clone)]
pub struct BridgeHandle {
    shared: Arc<BridgeShared>,
}

impl BridgeHandle {
    /// Deliver `message` to the bridge at `peer` and wait for its `Ack`.
    ///
    /// Blocks the calling thread for at most `timeout` (plus a short grace).
    /// Fails with [`NetError::OnIoThread`] when called from the I/O thread,
    /// where waiting would deadlock.
    pub fn deliver(
        &self,
        peer: SocketAddr,
        origin: EndpointId,
        message: &Message,
        timeout: Duration,
    ) -> Result<(), NetError> {
        if is_io_thread() {
            return Err(NetError::OnIoThread);
        }
        if !self.is_active() {
            return Err(NetError::BridgeUnavailable);
        }

        let frame = wire::encode_data(origin, message)?;
        let (reply, outcome) = sync_channel(1);
        self.shared
            .commands
            .send(BridgeCommand::Deliver {
                peer,
                frame,
                message_id: message.id(),
                timeout,
                reply,
            })
            .map_err(|_| NetError::BridgeUnavailable)?;

        match outcome.recv_timeout(timeout + REPLY_GRACE) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(NetError::Timeout { peer }),
            Err(RecvTimeoutError::Disconnected) => Err(NetError::BridgeUnavailable),
        }
    }

    /// Whether the listener is active on the I/O thread.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Address announced to other nodes.
    #[must_use]
    pub fn advertised_addr(&self) -> SocketAddr {
        self.shared.advertised
    }

    /// Connections that passed the ACL.
    #[must_use]
    pub fn accepted_count(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Connections dropped by the ACL.
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.shared.rejected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("local_addr", &self.shared.local_addr)
            .field("advertised", &self.shared.advertised)
            .field("active", &self.is_active())
            .finish()
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

enum Event {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Command(BridgeCommand),
    TaskDone(Result<(), JoinError>),
    Idle,
}

/// TCP bridge transport. Owned by the I/O service once staged.
pub struct BridgeTransport {
    shared: Arc<BridgeShared>,
    pending_listener: Option<std::net::TcpListener>,
    listener: Option<TcpListener>,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    acl: AccessControlList,
    router: Arc<dyn InboundRouter>,
    tasks: JoinSet<()>,
    idle_timeout: Duration,
}

impl BridgeTransport {
    /// Bind the listener on the calling thread.
    pub fn bind(
        config: BridgeConfig,
        acl: AccessControlList,
        router: Arc<dyn InboundRouter>,
    ) -> Result<(Self, BridgeHandle), NetError> {
        let listener = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let advertised = SocketAddr::new(IpAddr::V4(config.advertise_ip), local_addr.port());

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(BridgeShared {
            active: AtomicBool::new(false),
            commands: tx,
            local_addr,
            advertised,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        debug!(local = %local_addr, advertised = %advertised, "[mbus] Bridge listener bound");

        let transport = Self {
            shared: shared.clone(),
            pending_listener: Some(listener),
            listener: None,
            commands: rx,
            acl,
            router,
            tasks: JoinSet::new(),
            idle_timeout: config.idle_timeout,
        };
        Ok((transport, BridgeHandle { shared }))
    }

    fn on_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if !self.acl.is_allowed(peer.ip()) {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer, "[mbus] Bridge connection denied by ACL");
            drop(stream);
            return;
        }
        self.shared.accepted.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %peer, "[mbus] Bridge connection accepted");
        let router = self.router.clone();
        self.tasks.spawn(serve_connection(stream, peer, router, self.idle_timeout));
    }

    fn on_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Deliver {
                peer,
                frame,
                message_id,
                timeout,
                reply,
            } => {
                self.tasks.spawn(async move {
                    let result = match tokio::time::timeout(timeout, exchange(peer, frame, message_id)).await {
                        Ok(result) => result,
                        Err(_) => Err(NetError::Timeout { peer }),
                    };
                    if let Err(e) = &result {
                        debug!(peer = %peer, error = %e, "[mbus] Bridge delivery failed");
                    }
                    let _ = reply.send(result);
                });
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: Arc<dyn InboundRouter>,
    idle_timeout: Duration,
) {
    loop {
        let frame = match tokio::time::timeout(idle_timeout, read_frame(&mut stream)).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                debug!(peer = %peer, error = %e, "[mbus] Bridge read failed");
                break;
            }
            Err(_) => {
                debug!(
                    peer = %peer,
                    idle_ms = idle_timeout.as_millis() as u64,
                    "[mbus] Closing idle bridge connection"
                );
                break;
            }
        };

        match Packet::decode(&frame) {
            Ok(Packet::Data(data)) => {
                let message_id = data.message.id();
                let mut message = data.message;
                message.set_sender(Some(peer));
                router.route_inbound(message);

                let ack = match Packet::Ack(Ack { message_id }).encode() {
                    Ok(ack) => ack,
                    Err(e) => {
                        warn!(error = %e, "[mbus] ACK encode failed");
                        break;
                    }
                };
                if let Err(e) = write_frame(&mut stream, &ack).await {
                    debug!(peer = %peer, error = %e, "[mbus] ACK write failed");
                    break;
                }
            }
            Ok(other) => {
                debug!(peer = %peer, packet = other.packet_type().name(), "[mbus] Ignoring bridge packet");
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "[mbus] Malformed bridge frame, closing");
                break;
            }
        }
    }
}

async fn exchange(peer: SocketAddr, frame: Vec<u8>, message_id: Uuid) -> Result<(), NetError> {
    let mut stream = TcpStream::connect(peer).await?;
    write_frame(&mut stream, &frame).await?;

    let reply = read_frame(&mut stream).await?.ok_or_else(|| NetError::Delivery {
        peer,
        reason: "connection closed before acknowledgement".to_string(),
    })?;

    match Packet::decode(&reply)? {
        Packet::Ack(ack) if ack.message_id == message_id => Ok(()),
        other => Err(NetError::Delivery {
            peer,
            reason: format!("unexpected {} reply", other.packet_type().name()),
        }),
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn activate(&mut self) -> Result<(), NetError> {
        let std_listener = self.pending_listener.take().ok_or(NetError::NotActive(NAME))?;
        self.listener = Some(TcpListener::from_std(std_listener)?);
        self.shared.active.store(true, Ordering::SeqCst);
        info!(
            local = %self.shared.local_addr,
            advertised = %self.shared.advertised,
            "[mbus] Bridge transport active"
        );
        Ok(())
    }

    async fn poll(&mut self, wait: Duration) -> Result<(), NetError> {
        let event = {
            let listener = self.listener.as_ref().ok_or(NetError::NotActive(NAME))?;
            let has_tasks = !self.tasks.is_empty();
            tokio::select! {
                accepted = listener.accept() => Event::Accepted(accepted),
                Some(command) = self.commands.recv() => Event::Command(command),
                Some(done) = self.tasks.join_next(), if has_tasks => Event::TaskDone(done),
                _ = tokio::time::sleep(wait) => Event::Idle,
            }
        };

        match event {
            Event::Accepted(accepted) => {
                let (stream, peer) = accepted?;
                self.on_accept(stream, peer);
            }
            Event::Command(command) => self.on_command(command),
            Event::TaskDone(Err(e)) if e.is_panic() => {
                warn!(error = %e, "[mbus] Bridge task panicked");
            }
            Event::TaskDone(_) | Event::Idle => {}
        }
        Ok(())
    }

    fn release(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.listener = None;
        self.pending_listener = None;
        self.tasks.abort_all();
        self.commands.close();
        info!(local = %self.shared.local_addr, "[mbus] Bridge transport released");
    }
}
