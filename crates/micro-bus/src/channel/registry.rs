use super::ChannelInner;
use mbus_types::ChannelId;
use parking_lot::RwLock;
use std::sync::Arc;

/// Copy-on-write list of registered channels.
///
/// Routing takes a snapshot and iterates it without holding the lock;
/// register and remove swap in a new list under a short write lock.
/// Registration order is preserved and is the local delivery order.
#[derive(Default)]
pub(crate) struct ChannelRegistry {
    channels: RwLock<Arc<Vec<Arc<ChannelInner>>>>,
}

impl ChannelRegistry {
    pub(crate) fn register(&self, channel: Arc<ChannelInner>) {
        let mut guard = self.channels.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(channel);
        *guard = Arc::new(next);
    }

    pub(crate) fn remove(&self, id: ChannelId) -> Option<Arc<ChannelInner>> {
        let mut guard = self.channels.write();
        let index = guard.iter().position(|c| c.id() == id)?;
        let mut next: Vec<_> = guard.iter().cloned().collect();
        let removed = next.remove(index);
        *guard = Arc::new(next);
        Some(removed)
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<ChannelInner>>> {
        self.channels.read().clone()
    }

    pub(crate) fn get(&self, id: ChannelId) -> Option<Arc<ChannelInner>> {
        self.channels.read().iter().find(|c| c.id() == id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<ChannelInner>> {
        let mut guard = self.channels.write();
        let drained = guard.iter().cloned().collect();
        *guard = Arc::new(Vec::new());
        drained
    }
}
