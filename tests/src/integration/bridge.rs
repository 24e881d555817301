//! # Bridge Flows
//!
//! Reliable point-to-point delivery between two loopback nodes over the
//! TCP bridge, and the ACL that guards it.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use micro_bus::{BusError, EndpointId, Message, MessageAddress};

    use crate::integration::{connected_pair, wait_until};

    const TIMEOUT: Duration = Duration::from_secs(2);

    // =========================================================================
    // TEST GROUP 1: Reliable delivery
    // =========================================================================

    #[test]
    fn test_reliable_delivery_to_allowed_peer_is_acknowledged() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        b.add_acl_entry("127.0.0.0/8", true).unwrap();
        let first = b.channel();
        let second = b.channel();

        a.send_reliable_timeout(Message::new(b"invoice".to_vec()), b.endpoint_id(), TIMEOUT)
            .unwrap();

        // No target means every channel at the peer.
        for channel in [&first, &second] {
            let received = channel
                .recv_timeout(TIMEOUT)
                .unwrap()
                .and_then(|d| d.into_message())
                .expect("bridged message delivered");
            assert_eq!(received.payload(), b"invoice");
            assert_eq!(
                received.target(),
                Some(MessageAddress::all_channels(b.endpoint_id()))
            );
        }

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_reliable_delivery_to_specific_channel() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        b.add_acl_entry("127.0.0.1/32", true).unwrap();
        let target = b.channel();
        let other = b.channel();

        let message = Message::new(b"only-you".to_vec()).with_target(target.address());
        a.send_reliable(message, b.endpoint_id()).unwrap();

        assert!(wait_until(TIMEOUT, || target.pending() == 1));
        assert_eq!(other.pending(), 0);

        a.shutdown();
        b.shutdown();
    }

    // =========================================================================
    // TEST GROUP 2: ACL
    // =========================================================================

    #[test]
    fn test_empty_acl_denies_peer() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        let consumer = b.channel();

        let result =
            a.send_reliable_timeout(Message::new(b"nope".to_vec()), b.endpoint_id(), TIMEOUT);

        assert!(matches!(result, Err(BusError::Delivery(_))));
        assert_eq!(consumer.pending(), 0);

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_deny_entry_ahead_of_allow_wins() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        b.add_acl_entry("127.0.0.1/32", false).unwrap();
        b.add_acl_entry("127.0.0.0/8", true).unwrap();
        let consumer = b.channel();

        let result =
            a.send_reliable_timeout(Message::new(b"nope".to_vec()), b.endpoint_id(), TIMEOUT);

        assert!(matches!(result, Err(BusError::Delivery(_))));
        assert_eq!(consumer.pending(), 0);

        a.shutdown();
        b.shutdown();
    }

    // =========================================================================
    // TEST GROUP 3: Failure modes
    // =========================================================================

    #[test]
    fn test_unknown_endpoint_is_rejected_before_connecting() {
        let Some((a, b)) = connected_pair() else {
            return;
        };

        let result = a.send_reliable(Message::new(b"x".to_vec()), EndpointId::new(42));

        assert!(matches!(result, Err(BusError::UnknownEndpoint(id)) if id == EndpointId::new(42)));
        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_closed_bridge_fails_then_reopens() {
        let Some((a, b)) = connected_pair() else {
            return;
        };
        b.add_acl_entry("127.0.0.0/8", true).unwrap();
        let consumer = b.channel();

        b.close();
        assert!(b.bridge_addr().is_none());
        let b_id = b.endpoint_id();
        assert!(wait_until(Duration::from_secs(3), || {
            a.remote_nodes()
                .iter()
                .any(|n| n.endpoint == b_id && n.bridge.is_none())
        }));
        let result = a.send_reliable_timeout(Message::new(b"closed".to_vec()), b_id, TIMEOUT);
        assert!(matches!(result, Err(BusError::Delivery(_))));

        b.open().unwrap();
        let reopened = b.bridge_addr().unwrap();
        assert!(wait_until(Duration::from_secs(3), || {
            a.remote_nodes()
                .iter()
                .any(|n| n.endpoint == b_id && n.bridge == Some(reopened))
        }));

        a.send_reliable_timeout(Message::new(b"open".to_vec()), b_id, TIMEOUT)
            .unwrap();
        assert!(wait_until(TIMEOUT, || consumer.pending() == 1));

        a.shutdown();
        b.shutdown();
    }
}
