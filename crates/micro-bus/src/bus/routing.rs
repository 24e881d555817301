//! Local routing step, run once per arrival (local send or network).

use super::BusShared;
use crate::channel::ChannelEvent;
use crate::error::BusError;
use mbus_types::{ChannelId, Message, MessageAddress};
use std::sync::atomic::Ordering;
use tracing::{error, trace, warn};

impl BusShared {
    /// Validate and route a message sent by the application.
    pub(crate) fn submit(
        &self,
        mut message: Message,
        group: Option<&str>,
        source: Option<ChannelId>,
    ) -> Result<usize, BusError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BusError::IllegalState("bus has been shut down".into()));
        }
        if let Some(group) = group.filter(|g| !g.trim().is_empty()) {
            message.set_group(group);
        }
        if message.routable_group().is_none() && message.target().is_none() {
            return Err(BusError::InvalidArgument(
                "message has neither a group nor a target address".into(),
            ));
        }

        message.set_source(source);
        self.stats.record_sent();
        Ok(self.route(message))
    }

    /// Relay to the network (unless the message came from it), then
    /// deliver locally. Returns the number of local deliveries.
    ///
    /// A relay failure is logged and counted; local delivery still runs.
    pub(crate) fn route(&self, message: Message) -> usize {
        if !message.is_from_network() {
            let relay = self.relay.read().clone();
            if let Some(relay) = relay {
                match relay.publish(&message) {
                    Ok(()) => self.stats.record_relayed(),
                    Err(e) => {
                        warn!(
                            id = %message.id(),
                            error = %e,
                            "[mbus] Relay to network failed, delivering locally only"
                        );
                        self.stats.record_relay_failed();
                    }
                }
            }
        }

        let delivered = self.deliver_local(&message);
        self.stats.record_delivered(delivered);
        delivered
    }

    fn deliver_local(&self, message: &Message) -> usize {
        match message.target() {
            Some(target) if target.endpoint != self.endpoint => 0,
            Some(target) if !target.channel.is_all() => self.deliver_directed(message, target),
            Some(_) => self.fan_out(message, true),
            None => self.fan_out(message, false),
        }
    }

    fn deliver_directed(&self, message: &Message, target: MessageAddress) -> usize {
        if let Some(channel) = self.registry.get(target.channel) {
            if channel.deliver(message.clone()) {
                return 1;
            }
        }

        error!(
            target = %target,
            id = %message.id(),
            "[mbus] Undeliverable message: no open channel at target"
        );
        self.stats.record_undeliverable();
        if let Some(source) = message.source().and_then(|id| self.registry.get(id)) {
            source.listeners().emit(&ChannelEvent::Undeliverable {
                channel: source.id(),
                message_id: message.id(),
                target,
            });
        }
        0
    }

    /// Deliver to every matching channel except the source, in registration
    /// order. With `all_channels` and no group, every channel matches.
    fn fan_out(&self, message: &Message, all_channels: bool) -> usize {
        let group = message.routable_group();
        if group.is_none() && !all_channels {
            return 0;
        }
        let source = message.source();

        let mut delivered = 0;
        for channel in self.registry.snapshot().iter() {
            if Some(channel.id()) == source {
                continue;
            }
            let matches = match group {
                Some(group) => channel.is_subscribed(group),
                None => true,
            };
            if matches && channel.deliver(message.clone()) {
                delivered += 1;
            }
        }
        trace!(id = %message.id(), delivered, "[mbus] Fan-out complete");
        delivered
    }
}
