//! # Cross-Node Flows
//!
//! Two bus instances on the loopback subnet, sharing one UDP port:
//!
//! 1. **Discovery**: heartbeats populate each node's remote table
//! 2. **Group relay**: a group message sent on node A reaches the
//!    subscribers on node B and nobody else
//! 3. **Directed relay**: a message addressed to a channel on node B is
//!    delivered there only

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use micro_bus::{ChannelId, Message, MessageAddress};

    use crate::integration::{connected_pair, wait_until};

    // =========================================================================
    // TEST GROUP 1: Discovery
    // =========================================================================

    #[test]
    fn test_nodes_discover_each_other_and_advertise_bridges() {
        let Some((a, b)) = connected_pair() else {
            return;
        };

        let seen_by_a = a
            .remote_nodes()
            .into_iter()
            .find(|n| n.endpoint == b.endpoint_id())
            .unwrap();
        assert_eq!(seen_by_a.bridge, b.bridge_addr());
        assert!(seen_by_a.address.ip().is_loopback());
        assert!(a.is_ready());
        assert!(b.is_ready());

        a.shutdown();
        b.shutdown();
    }

    // =========================================================================
    // TEST GROUP 2: Group relay
    // =========================================================================

    #[test]
    fn test_orders_cross_nodes_but_shipments_do_not_leak() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        let producer = a.channel();
        let remote_orders = b.channel();
        let remote_shipments = b.channel();
        remote_orders.join("orders").unwrap();
        remote_shipments.join("shipments").unwrap();

        let local = producer
            .send_to_group(
                Message::new(b"order-7".to_vec()).with_header("customer", "acme"),
                "orders",
            )
            .unwrap();
        assert_eq!(local, 0);

        let received = remote_orders
            .recv_timeout(Duration::from_secs(3))
            .unwrap()
            .and_then(|d| d.into_message())
            .expect("order relayed to node B");
        assert_eq!(received.payload(), b"order-7");
        assert_eq!(received.group(), Some("orders"));
        assert_eq!(received.header("customer"), Some("acme"));
        assert_eq!(received.source(), Some(ChannelId::RELAY));
        assert!(received.sender().is_some());

        assert_eq!(remote_shipments.pending(), 0);
        assert_eq!(a.stats().relayed_to_network, 1);
        assert!(wait_until(Duration::from_secs(1), || {
            b.stats().received_from_network >= 1
        }));

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_relayed_message_is_not_echoed_back() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        let producer = a.channel();
        let local_subscriber = a.channel();
        local_subscriber.join("orders").unwrap();
        let remote_subscriber = b.channel();
        remote_subscriber.join("orders").unwrap();

        producer
            .send_to_group(Message::new(b"once".to_vec()), "orders")
            .unwrap();

        assert!(remote_subscriber
            .recv_timeout(Duration::from_secs(3))
            .unwrap()
            .is_some());
        // Give a would-be echo time to arrive.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(local_subscriber.pending(), 1);
        assert_eq!(remote_subscriber.pending(), 0);

        a.shutdown();
        b.shutdown();
    }

    // =========================================================================
    // TEST GROUP 3: Directed relay
    // =========================================================================

    #[test]
    fn test_directed_message_reaches_remote_channel_only() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        let sender = a.channel();
        let local_peer = a.channel();
        let target = b.channel();
        let remote_peer = b.channel();

        let delivered = sender
            .send_to(Message::new(b"ping".to_vec()), target.address())
            .unwrap();
        assert_eq!(delivered, 0);

        let received = target
            .recv_timeout(Duration::from_secs(3))
            .unwrap()
            .and_then(|d| d.into_message())
            .expect("directed message delivered on node B");
        assert_eq!(received.payload(), b"ping");
        assert_eq!(
            received.target(),
            Some(MessageAddress::new(b.endpoint_id(), target.id()))
        );
        assert_eq!(local_peer.pending(), 0);
        assert_eq!(remote_peer.pending(), 0);

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_shutdown_node_stops_receiving() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        let producer = a.channel();
        let consumer = b.channel();
        consumer.join("orders").unwrap();
        b.shutdown();

        producer
            .send_to_group(Message::new(b"late".to_vec()), "orders")
            .unwrap();
        std::thread::sleep(Duration::from_millis(300));

        assert!(!consumer.is_open());
        assert_eq!(b.stats().received_from_network, 0);
        a.shutdown();
    }
}
