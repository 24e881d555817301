//! # Local Routing Flows
//!
//! Facade-level flows on a single bus that never opens the network:
//! group fan-out, directed delivery, sinks, events and shutdown.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use micro_bus::{
        BusConfig, BusError, ChannelEvent, ChannelEventKind, ChannelId, Lifecycle,
        LifecycleManager, Message, MessageAddress, MicroBus,
    };
    use parking_lot::Mutex;

    fn recv_payload(channel: &micro_bus::Channel) -> Option<Vec<u8>> {
        channel
            .recv_timeout(Duration::from_millis(200))
            .unwrap()
            .and_then(|d| d.into_message())
            .map(|m| m.into_payload())
    }

    // =========================================================================
    // TEST GROUP 1: Group fan-out
    // =========================================================================

    #[test]
    fn test_orders_reach_only_order_subscribers() {
        let bus = MicroBus::new(BusConfig::default());
        let producer = bus.channel();
        let billing = bus.channel();
        let warehouse = bus.channel();
        let shipping = bus.channel();
        billing.join("orders").unwrap();
        warehouse.join("orders").unwrap();
        shipping.join("shipments").unwrap();

        let delivered = producer
            .send_to_group(Message::new(b"order-1".to_vec()), "orders")
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(recv_payload(&billing).as_deref(), Some(&b"order-1"[..]));
        assert_eq!(recv_payload(&warehouse).as_deref(), Some(&b"order-1"[..]));
        assert_eq!(shipping.pending(), 0);
        assert_eq!(producer.pending(), 0);
        bus.shutdown();
    }

    #[test]
    fn test_sender_subscribed_to_group_does_not_receive_own_message() {
        let bus = MicroBus::new(BusConfig::default());
        let chatty = bus.channel();
        let other = bus.channel();
        chatty.join("chat").unwrap();
        other.join("chat").unwrap();

        let delivered = chatty
            .send_to_group(Message::new(b"hi".to_vec()), "chat")
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(chatty.pending(), 0);
        assert_eq!(other.pending(), 1);
        bus.shutdown();
    }

    #[test]
    fn test_bus_level_send_reaches_every_subscriber() {
        let bus = MicroBus::new(BusConfig::default());
        let a = bus.channel();
        let b = bus.channel();
        a.join("metrics").unwrap();
        b.join("metrics").unwrap();

        let delivered = bus
            .send(Message::new(b"cpu=3".to_vec()), Some("metrics"))
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(bus.stats().delivered, 2);
        bus.shutdown();
    }

    #[test]
    fn test_messages_arrive_in_send_order() {
        let bus = MicroBus::new(BusConfig::default());
        let producer = bus.channel();
        let consumer = bus.channel();
        consumer.join("seq").unwrap();

        for i in 0u8..20 {
            producer.send_to_group(Message::new(vec![i]), "seq").unwrap();
        }
        for i in 0u8..20 {
            assert_eq!(recv_payload(&consumer), Some(vec![i]));
        }
        bus.shutdown();
    }

    // =========================================================================
    // TEST GROUP 2: Directed delivery
    // =========================================================================

    #[test]
    fn test_directed_message_reaches_only_target() {
        let bus = MicroBus::new(BusConfig::default());
        let sender = bus.channel();
        let target = bus.channel();
        let bystander = bus.channel();
        bystander.join("orders").unwrap();

        // The group is carried but ignored for addressing.
        let message = Message::new(b"direct".to_vec()).with_group("orders");
        let delivered = sender.send_to(message, target.address()).unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(bystander.pending(), 0);
        assert_eq!(sender.pending(), 0);
        let received = target
            .try_recv()
            .unwrap()
            .and_then(|d| d.into_message())
            .unwrap();
        assert_eq!(received.payload(), b"direct");
        assert_eq!(received.group(), Some("orders"));
        bus.shutdown();
    }

    #[test]
    fn test_directed_to_missing_channel_raises_undeliverable() {
        let bus = MicroBus::new(BusConfig::default());
        let sender = bus.channel();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        sender.on_event(&[ChannelEventKind::Undeliverable], move |event| {
            sink.lock().push(event.clone());
        });

        let missing = MessageAddress::new(bus.endpoint_id(), ChannelId::new(9_999));
        let delivered = sender
            .send_to(Message::new(b"lost".to_vec()), missing)
            .unwrap();

        assert_eq!(delivered, 0);
        assert_eq!(bus.stats().undeliverable, 1);
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ChannelEvent::Undeliverable { target, .. } if *target == missing
        ));
        bus.shutdown();
    }

    #[test]
    fn test_all_channels_target_reaches_everyone_but_sender() {
        let bus = MicroBus::new(BusConfig::default());
        let sender = bus.channel();
        let others: Vec<_> = (0..3).map(|_| bus.channel()).collect();

        let delivered = sender
            .send_to(
                Message::new(b"all".to_vec()),
                MessageAddress::all_channels(bus.endpoint_id()),
            )
            .unwrap();

        assert_eq!(delivered, 3);
        assert!(others.iter().all(|c| c.pending() == 1));
        assert_eq!(sender.pending(), 0);
        bus.shutdown();
    }

    // =========================================================================
    // TEST GROUP 3: Sinks
    // =========================================================================

    #[test]
    fn test_sink_channel_is_invoked_synchronously() {
        let bus = MicroBus::new(BusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let consumer = bus.channel_with_sink(move |message| {
            assert_eq!(message.payload(), b"tick");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        consumer.join("clock").unwrap();
        let producer = bus.channel();

        for _ in 0..5 {
            producer
                .send_to_group(Message::new(b"tick".to_vec()), "clock")
                .unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(consumer.pending(), 0);
        bus.shutdown();
    }

    // =========================================================================
    // TEST GROUP 4: Shutdown
    // =========================================================================

    #[test]
    fn test_shutdown_wakes_blocked_receiver() {
        let bus = MicroBus::new(BusConfig::default());
        let consumer = bus.channel();
        let waiter = std::thread::spawn(move || consumer.recv().unwrap());

        std::thread::sleep(Duration::from_millis(50));
        bus.shutdown();

        let delivery = waiter.join().unwrap();
        assert!(delivery.is_closed());
    }

    #[test]
    fn test_send_after_shutdown_is_illegal_state() {
        let bus = MicroBus::new(BusConfig::default());
        let producer = bus.channel();
        bus.shutdown();

        let result = bus.send(Message::new(b"late".to_vec()), Some("orders"));
        assert!(matches!(result, Err(BusError::IllegalState(_))));
        assert!(!producer.is_open());
        assert!(!bus.create_channel(None).is_open());
    }

    #[test]
    fn test_lifecycle_manager_shuts_bus_down() {
        let bus = MicroBus::new(BusConfig::default());
        let consumer = bus.channel();
        let manager = LifecycleManager::new();
        manager.register(Arc::new(bus.clone()) as Arc<dyn Lifecycle>);

        manager.run_shutdown_hooks();

        assert!(bus.is_shut_down());
        assert!(!consumer.is_open());
    }
}
