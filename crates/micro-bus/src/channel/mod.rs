//! # Channels
//!
//! A channel is an application's attachment point to the bus: it joins
//! groups, sends through the bus, and receives copies of matching messages
//! either through a sink callback or through an internal queue.
//!
//! ## Inbound Modes
//!
//! - **Sink**: the callback runs on the sending thread (or on the I/O thread
//!   for network arrivals), outside every bus lock. A sink may close its own
//!   channel.
//! - **Queue**: deliveries are buffered; the application drains them with
//!   [`Channel::recv`], [`Channel::recv_timeout`] or [`Channel::try_recv`].
//!   Closing pushes [`Delivery::Closed`] so a blocked consumer wakes.

mod events;
pub(crate) mod registry;

pub use events::{ChannelEvent, ChannelEventKind, ListenerId};
pub(crate) use events::Listeners;

use crate::bus::BusShared;
use crate::error::BusError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use mbus_types::{ChannelId, EndpointId, Message, MessageAddress};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Inbound callback of a sink-backed channel.
pub type Sink = Arc<dyn Fn(Message) + Send + Sync>;

/// One item taken from a channel's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A delivered message.
    Message(Message),
    /// The channel was closed; nothing more will arrive.
    Closed,
}

impl Delivery {
    /// The message, or `None` for the closure sentinel.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        match self {
            Delivery::Message(message) => Some(message),
            Delivery::Closed => None,
        }
    }

    /// Whether this is the closure sentinel.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Delivery::Closed)
    }
}

enum Inbound {
    Sink(RwLock<Option<Sink>>),
    Queue {
        tx: Mutex<Option<Sender<Delivery>>>,
        rx: Receiver<Delivery>,
    },
}

// =============================================================================
// CHANNEL STATE
// =============================================================================

/// Registry-side state of a channel.
pub(crate) struct ChannelInner {
    id: ChannelId,
    endpoint: EndpointId,
    groups: RwLock<BTreeSet<String>>,
    inbound: Inbound,
    listeners: Listeners,
    open: AtomicBool,
}

impl ChannelInner {
    pub(crate) fn new(id: ChannelId, endpoint: EndpointId, sink: Option<Sink>) -> Self {
        let inbound = match sink {
            Some(sink) => Inbound::Sink(RwLock::new(Some(sink))),
            None => {
                let (tx, rx) = crossbeam_channel::unbounded();
                Inbound::Queue {
                    tx: Mutex::new(Some(tx)),
                    rx,
                }
            }
        };
        Self {
            id,
            endpoint,
            groups: RwLock::new(BTreeSet::new()),
            inbound,
            listeners: Listeners::default(),
            open: AtomicBool::new(true),
        }
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn is_subscribed(&self, group: &str) -> bool {
        self.groups.read().contains(group)
    }

    pub(crate) fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Hand `message` to the channel. Returns `false` if the channel is
    /// closed.
    pub(crate) fn deliver(&self, message: Message) -> bool {
        if !self.is_open() {
            return false;
        }
        let message_id = message.id();
        match &self.inbound {
            Inbound::Sink(slot) => {
                let sink = slot.read().clone();
                match sink {
                    Some(sink) => sink(message),
                    None => return false,
                }
            }
            Inbound::Queue { tx, .. } => {
                let guard = tx.lock();
                match guard.as_ref() {
                    Some(tx) if tx.send(Delivery::Message(message)).is_ok() => {}
                    _ => return false,
                }
            }
        }
        self.listeners.emit(&ChannelEvent::Received {
            channel: self.id,
            message_id,
        });
        true
    }

    /// Mark closed, wake the consumer, drop the sink. Returns `false` if the
    /// channel was already closed.
    pub(crate) fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        match &self.inbound {
            Inbound::Sink(slot) => {
                slot.write().take();
            }
            Inbound::Queue { tx, .. } => {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(Delivery::Closed);
                }
            }
        }
        debug!(channel = %self.id, "[mbus] Channel closed");
        self.listeners.emit(&ChannelEvent::Closed { channel: self.id });
        self.listeners.clear();
        true
    }

    fn queue(&self) -> Result<&Receiver<Delivery>, BusError> {
        match &self.inbound {
            Inbound::Queue { rx, .. } => Ok(rx),
            Inbound::Sink(_) => Err(BusError::IllegalState(format!(
                "channel {} delivers to a sink and has no queue",
                self.id
            ))),
        }
    }
}

// =============================================================================
// CHANNEL HANDLE
// =============================================================================

/// Handle to a registered channel. Clones refer to the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
    bus: Arc<BusShared>,
}

impl Channel {
    pub(crate) fn new(inner: Arc<ChannelInner>, bus: Arc<BusShared>) -> Self {
        Self { inner, bus }
    }

    /// Channel id, unique within the bus.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Address of this channel for directed messages.
    #[must_use]
    pub fn address(&self) -> MessageAddress {
        MessageAddress::new(self.inner.endpoint, self.inner.id)
    }

    /// Join `group`. Joining a group twice is a no-op.
    pub fn join(&self, group: impl Into<String>) -> Result<(), BusError> {
        self.ensure_open()?;
        let group = group.into();
        if group.trim().is_empty() {
            return Err(BusError::InvalidArgument("group name is blank".into()));
        }
        let added = self.inner.groups.write().insert(group.clone());
        if added {
            debug!(channel = %self.inner.id, group = %group, "[mbus] Joined group");
            self.inner.listeners.emit(&ChannelEvent::Joined {
                channel: self.inner.id,
                group,
            });
        }
        Ok(())
    }

    /// Leave `group`. Returns whether the channel was a member.
    pub fn leave(&self, group: &str) -> bool {
        let removed = self.inner.groups.write().remove(group);
        if removed {
            self.inner.listeners.emit(&ChannelEvent::Left {
                channel: self.inner.id,
                group: group.to_string(),
            });
        }
        removed
    }

    /// Joined groups, sorted.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.inner.groups.read().iter().cloned().collect()
    }

    /// Whether the channel joined `group`.
    #[must_use]
    pub fn is_subscribed(&self, group: &str) -> bool {
        self.inner.is_subscribed(group)
    }

    /// Send `message` to its own group or target.
    pub fn send(&self, message: Message) -> Result<usize, BusError> {
        self.submit(message, None)
    }

    /// Send `message` to `group`, overriding the message's group.
    pub fn send_to_group(&self, message: Message, group: &str) -> Result<usize, BusError> {
        self.submit(message, Some(group))
    }

    /// Send `message` to an explicit address.
    pub fn send_to(&self, mut message: Message, address: MessageAddress) -> Result<usize, BusError> {
        message.set_target(Some(address));
        self.submit(message, None)
    }

    fn submit(&self, message: Message, group: Option<&str>) -> Result<usize, BusError> {
        self.ensure_open()?;
        let message_id = message.id();
        let deliveries = self.bus.submit(message, group, Some(self.inner.id))?;
        self.inner.listeners.emit(&ChannelEvent::Sent {
            channel: self.inner.id,
            message_id,
            deliveries,
        });
        Ok(deliveries)
    }

    /// Block until a delivery arrives. Returns [`Delivery::Closed`] once the
    /// channel is closed and drained.
    pub fn recv(&self) -> Result<Delivery, BusError> {
        let rx = self.inner.queue()?;
        Ok(rx.recv().unwrap_or(Delivery::Closed))
    }

    /// Wait up to `timeout` for a delivery. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Delivery>, BusError> {
        let rx = self.inner.queue()?;
        match rx.recv_timeout(timeout) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(Some(Delivery::Closed)),
        }
    }

    /// Take a delivery if one is waiting.
    pub fn try_recv(&self) -> Result<Option<Delivery>, BusError> {
        let rx = self.inner.queue()?;
        match rx.try_recv() {
            Ok(delivery) => Ok(Some(delivery)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Ok(Some(Delivery::Closed)),
        }
    }

    /// Deliveries waiting in the queue (0 for sink-backed channels).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue().map_or(0, |rx| rx.len())
    }

    /// Subscribe to events of the given kinds.
    pub fn on_event<F>(&self, kinds: &[ChannelEventKind], callback: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(kinds, Arc::new(callback))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Close the channel and remove it from the bus. Idempotent.
    pub fn close(&self) {
        if self.inner.close() {
            self.bus.unregister(self.inner.id);
        }
    }

    /// Whether the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.inner.is_open() {
            Ok(())
        } else {
            Err(BusError::IllegalState(format!("channel {} is closed", self.inner.id)))
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .field("open", &self.is_open())
            .field("groups", &self.groups())
            .finish()
    }
}
