use mbus_types::{ChannelId, MessageAddress};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Kind of a [`ChannelEvent`], used to pick which events a listener gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    /// The channel joined a group.
    Joined,
    /// The channel left a group.
    Left,
    /// The channel sent a message.
    Sent,
    /// A message was delivered to the channel.
    Received,
    /// A directed message sent from the channel found no target.
    Undeliverable,
    /// The channel was closed.
    Closed,
}

impl ChannelEventKind {
    /// Every kind.
    pub const ALL: [ChannelEventKind; 6] = [
        ChannelEventKind::Joined,
        ChannelEventKind::Left,
        ChannelEventKind::Sent,
        ChannelEventKind::Received,
        ChannelEventKind::Undeliverable,
        ChannelEventKind::Closed,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Something that happened to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Joined `group`.
    Joined {
        /// Channel id.
        channel: ChannelId,
        /// Group joined.
        group: String,
    },
    /// Left `group`.
    Left {
        /// Channel id.
        channel: ChannelId,
        /// Group left.
        group: String,
    },
    /// Sent a message, delivered locally `deliveries` times.
    Sent {
        /// Channel id.
        channel: ChannelId,
        /// Id of the sent message.
        message_id: Uuid,
        /// Local deliveries made.
        deliveries: usize,
    },
    /// Received a message.
    Received {
        /// Channel id.
        channel: ChannelId,
        /// Id of the received message.
        message_id: Uuid,
    },
    /// A directed message sent from this channel had no target.
    Undeliverable {
        /// Channel id.
        channel: ChannelId,
        /// Id of the dropped message.
        message_id: Uuid,
        /// Address that did not resolve.
        target: MessageAddress,
    },
    /// The channel was closed.
    Closed {
        /// Channel id.
        channel: ChannelId,
    },
}

impl ChannelEvent {
    /// The event's kind.
    #[must_use]
    pub fn kind(&self) -> ChannelEventKind {
        match self {
            ChannelEvent::Joined { .. } => ChannelEventKind::Joined,
            ChannelEvent::Left { .. } => ChannelEventKind::Left,
            ChannelEvent::Sent { .. } => ChannelEventKind::Sent,
            ChannelEvent::Received { .. } => ChannelEventKind::Received,
            ChannelEvent::Undeliverable { .. } => ChannelEventKind::Undeliverable,
            ChannelEvent::Closed { .. } => ChannelEventKind::Closed,
        }
    }

    /// The channel the event concerns.
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        match self {
            ChannelEvent::Joined { channel, .. }
            | ChannelEvent::Left { channel, .. }
            | ChannelEvent::Sent { channel, .. }
            | ChannelEvent::Received { channel, .. }
            | ChannelEvent::Undeliverable { channel, .. }
            | ChannelEvent::Closed { channel } => *channel,
        }
    }
}

/// Handle returned by [`Channel::on_event`](super::Channel::on_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    mask: u8,
    callback: Callback,
}

/// Event listeners of one channel.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<Listener>>,
}

impl Listeners {
    pub(crate) fn add(&self, kinds: &[ChannelEventKind], callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mask = kinds.iter().fold(0u8, |mask, kind| mask | kind.bit());
        self.entries.write().push(Listener { id, mask, callback });
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|l| l.id != id);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }

    /// Invoke matching listeners outside the lock.
    pub(crate) fn emit(&self, event: &ChannelEvent) {
        let bit = event.kind().bit();
        let matching: Vec<Callback> = self
            .entries
            .read()
            .iter()
            .filter(|l| l.mask & bit != 0)
            .map(|l| l.callback.clone())
            .collect();
        for callback in matching {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_listener_filters_by_kind() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        listeners.add(
            &[ChannelEventKind::Joined, ChannelEventKind::Closed],
            Arc::new(move |e: &ChannelEvent| sink.lock().push(e.kind())),
        );

        let channel = ChannelId(1);
        listeners.emit(&ChannelEvent::Joined {
            channel,
            group: "g".into(),
        });
        listeners.emit(&ChannelEvent::Received {
            channel,
            message_id: Uuid::new_v4(),
        });
        listeners.emit(&ChannelEvent::Closed { channel });

        assert_eq!(
            *seen.lock(),
            vec![ChannelEventKind::Joined, ChannelEventKind::Closed]
        );
    }

    #[test]
    fn test_remove_listener() {
        let listeners = Listeners::default();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let id = listeners.add(
            &ChannelEventKind::ALL,
            Arc::new(move |_: &ChannelEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let event = ChannelEvent::Closed {
            channel: ChannelId(1),
        };
        listeners.emit(&event);
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.emit(&event);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_accessors() {
        let event = ChannelEvent::Sent {
            channel: ChannelId(4),
            message_id: Uuid::new_v4(),
            deliveries: 2,
        };
        assert_eq!(event.kind(), ChannelEventKind::Sent);
        assert_eq!(event.channel(), ChannelId(4));
    }
}
