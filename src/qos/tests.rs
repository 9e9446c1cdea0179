//! QoS tracker tests

use std::collections::HashSet;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::protocol::{Packet, Publish, QoS};

fn outbound(qos: QoS) -> Publish {
    Publish {
        qos,
        topic: "a/b".into(),
        payload: Bytes::from_static(b"hello"),
        ..Default::default()
    }
}

fn inbound(qos: QoS, packet_id: u16, dup: bool) -> Publish {
    Publish {
        dup,
        qos,
        topic: "x/y".into(),
        packet_id: Some(packet_id),
        payload: Bytes::from_static(b"data"),
        ..Default::default()
    }
}

#[test]
fn test_qos0_is_never_tracked() {
    let mut tracker = QosTracker::new();
    let mut publish = outbound(QoS::AtMostOnce);
    assert_eq!(tracker.register_outbound(&mut publish), Ok(None));
    assert_eq!(publish.packet_id, None);
    assert_eq!(tracker.outbound_len(), 0);

    let received = Publish {
        qos: QoS::AtMostOnce,
        ..Default::default()
    };
    assert_eq!(
        tracker.on_inbound_publish(&received),
        Ok(InboundDisposition::Deliver)
    );
    assert_eq!(tracker.inbound_len(), 0);
}

#[test]
fn test_outbound_ids_start_at_one_and_increase() {
    let mut tracker = QosTracker::new();
    for expected in 1..=3 {
        let mut publish = outbound(QoS::AtLeastOnce);
        assert_eq!(tracker.register_outbound(&mut publish), Ok(Some(expected)));
        assert_eq!(publish.packet_id, Some(expected));
    }
}

#[test]
fn test_outbound_qos1_flow() {
    let mut tracker = QosTracker::new();
    let mut publish = outbound(QoS::AtLeastOnce);
    let id = tracker.register_outbound(&mut publish).unwrap().unwrap();

    let entry = tracker.get(Direction::Outbound, id).unwrap();
    assert_eq!(entry.stage, Stage::Sent);
    assert_eq!(entry.direction, Direction::Outbound);

    assert_eq!(tracker.on_puback(id), Ok(()));
    assert_eq!(tracker.outbound_len(), 0);
    // A second PUBACK for the same id is unknown
    assert_eq!(tracker.on_puback(id), Err(QosError::UnknownPacketId(id)));
}

#[test]
fn test_outbound_qos2_flow() {
    let mut tracker = QosTracker::new();
    let mut publish = outbound(QoS::ExactlyOnce);
    let id = tracker.register_outbound(&mut publish).unwrap().unwrap();

    // PUBCOMP before PUBREC is out of stage
    assert_eq!(tracker.on_pubcomp(id), Err(QosError::UnexpectedStage(id)));
    // PUBACK for a QoS 2 exchange is out of stage
    assert_eq!(tracker.on_puback(id), Err(QosError::UnexpectedStage(id)));

    assert_eq!(tracker.on_pubrec(id), Ok(()));
    assert_eq!(
        tracker.get(Direction::Outbound, id).unwrap().stage,
        Stage::ReceivedAck
    );
    assert_eq!(tracker.on_pubrec(id), Err(QosError::UnexpectedStage(id)));

    assert_eq!(tracker.on_pubcomp(id), Ok(()));
    assert_eq!(tracker.outbound_len(), 0);
}

#[test]
fn test_zero_packet_id_rejected_in_both_directions() {
    let mut tracker = QosTracker::new();
    assert_eq!(tracker.on_puback(0), Err(QosError::ZeroPacketId));
    assert_eq!(tracker.on_pubrec(0), Err(QosError::ZeroPacketId));
    assert_eq!(tracker.on_pubcomp(0), Err(QosError::ZeroPacketId));
    assert_eq!(tracker.on_pubrel(0), Err(QosError::ZeroPacketId));
    assert_eq!(
        tracker.on_inbound_publish(&inbound(QoS::AtLeastOnce, 0, false)),
        Err(QosError::ZeroPacketId)
    );
    assert_eq!(
        tracker.on_inbound_publish(&inbound(QoS::ExactlyOnce, 0, false)),
        Err(QosError::ZeroPacketId)
    );
}

#[test]
fn test_inbound_qos2_dedup_until_release() {
    let mut tracker = QosTracker::new();

    assert_eq!(
        tracker.on_inbound_publish(&inbound(QoS::ExactlyOnce, 42, false)),
        Ok(InboundDisposition::Deliver)
    );
    assert_eq!(
        tracker.on_inbound_publish(&inbound(QoS::ExactlyOnce, 42, true)),
        Ok(InboundDisposition::Duplicate)
    );
    assert_eq!(
        tracker.get(Direction::Inbound, 42).unwrap().stage,
        Stage::Received
    );

    assert_eq!(tracker.on_pubrel(42), Ok(()));
    assert_eq!(tracker.on_pubrel(42), Err(QosError::UnknownPacketId(42)));

    // After release the identifier starts a fresh exchange
    assert_eq!(
        tracker.on_inbound_publish(&inbound(QoS::ExactlyOnce, 42, false)),
        Ok(InboundDisposition::Deliver)
    );
}

#[test]
fn test_inbound_qos1_is_not_tracked() {
    let mut tracker = QosTracker::new();
    for _ in 0..2 {
        assert_eq!(
            tracker.on_inbound_publish(&inbound(QoS::AtLeastOnce, 5, false)),
            Ok(InboundDisposition::Deliver)
        );
    }
    assert_eq!(tracker.inbound_len(), 0);
}

#[test]
fn test_identifier_spaces_are_independent() {
    let mut tracker = QosTracker::new();
    let mut publish = outbound(QoS::ExactlyOnce);
    let id = tracker.register_outbound(&mut publish).unwrap().unwrap();
    assert_eq!(id, 1);

    assert_eq!(
        tracker.on_inbound_publish(&inbound(QoS::ExactlyOnce, 1, false)),
        Ok(InboundDisposition::Deliver)
    );
    assert!(tracker.get(Direction::Outbound, 1).is_some());
    assert!(tracker.get(Direction::Inbound, 1).is_some());

    // Releasing the inbound exchange leaves the outbound one alone
    assert_eq!(tracker.on_pubrel(1), Ok(()));
    assert!(tracker.get(Direction::Outbound, 1).is_some());

    // The next outbound id does not care about inbound usage
    assert_eq!(
        tracker.on_inbound_publish(&inbound(QoS::ExactlyOnce, 2, false)),
        Ok(InboundDisposition::Deliver)
    );
    let mut next = outbound(QoS::AtLeastOnce);
    assert_eq!(tracker.register_outbound(&mut next), Ok(Some(2)));
}

#[test]
fn test_allocation_skips_in_flight_ids_after_wrap() {
    let mut tracker = QosTracker::new();
    tracker.next_packet_id = u16::MAX;

    let mut first = outbound(QoS::AtLeastOnce);
    assert_eq!(tracker.register_outbound(&mut first), Ok(Some(u16::MAX)));

    let mut second = outbound(QoS::AtLeastOnce);
    assert_eq!(tracker.register_outbound(&mut second), Ok(Some(1)));

    // Wrap again: 65535 and 1 are still in flight, so 2 is next
    tracker.next_packet_id = u16::MAX;
    let mut third = outbound(QoS::AtLeastOnce);
    assert_eq!(tracker.register_outbound(&mut third), Ok(Some(2)));
}

#[test]
fn test_exhaustion_returns_backpressure() {
    let mut tracker = QosTracker::new();
    for _ in 0..PACKET_ID_SPACE {
        let mut publish = outbound(QoS::AtLeastOnce);
        assert!(tracker.register_outbound(&mut publish).is_ok());
    }
    assert_eq!(tracker.outbound_len(), PACKET_ID_SPACE);

    let mut overflow = outbound(QoS::AtLeastOnce);
    assert_eq!(
        tracker.register_outbound(&mut overflow),
        Err(QosError::PacketIdsExhausted)
    );

    // Completing one exchange frees exactly that identifier
    assert_eq!(tracker.on_puback(777), Ok(()));
    let mut next = outbound(QoS::AtLeastOnce);
    assert_eq!(tracker.register_outbound(&mut next), Ok(Some(777)));
}

#[test]
fn test_retransmit_follows_stage() {
    let mut tracker = QosTracker::new();
    let mut publish = outbound(QoS::ExactlyOnce);
    let id = tracker.register_outbound(&mut publish).unwrap().unwrap();

    match tracker.retransmit(id).unwrap() {
        Packet::Publish(p) => {
            assert!(p.dup);
            assert_eq!(p.packet_id, Some(id));
            assert_eq!(p.payload, Bytes::from_static(b"hello"));
        }
        other => panic!("expected PUBLISH, got {:?}", other),
    }

    tracker.on_pubrec(id).unwrap();
    assert_eq!(
        tracker.retransmit(id).unwrap(),
        Packet::PubRel(crate::protocol::PubRel::new(id))
    );

    tracker.on_pubcomp(id).unwrap();
    assert_eq!(tracker.retransmit(id), Err(QosError::UnknownPacketId(id)));
}

#[test]
fn test_clear_discards_everything() {
    let mut tracker = QosTracker::new();
    let mut publish = outbound(QoS::AtLeastOnce);
    tracker.register_outbound(&mut publish).unwrap();
    tracker
        .on_inbound_publish(&inbound(QoS::ExactlyOnce, 9, false))
        .unwrap();

    tracker.clear();
    assert_eq!(tracker.outbound_len(), 0);
    assert_eq!(tracker.inbound_len(), 0);
}

#[test]
fn test_qos_error_maps_to_protocol_error() {
    use crate::protocol::{PacketType, ProtocolError};

    assert_eq!(
        QosError::UnknownPacketId(4).into_protocol_error(PacketType::PubAck),
        ProtocolError::UnknownPacketId {
            packet: PacketType::PubAck,
            packet_id: 4
        }
    );
    assert_eq!(
        QosError::ZeroPacketId.into_protocol_error(PacketType::PubRel),
        ProtocolError::ZeroPacketId(PacketType::PubRel)
    );
}

proptest! {
    /// Identifiers handed out while earlier exchanges are still open are
    /// always non-zero and never collide with an open exchange.
    #[test]
    fn prop_outbound_ids_unique_while_in_flight(
        start in 1u16..=u16::MAX,
        ops in proptest::collection::vec(any::<bool>(), 1..200),
    ) {
        let mut tracker = QosTracker::new();
        tracker.next_packet_id = start;
        let mut open: Vec<u16> = Vec::new();

        for complete in ops {
            if complete && !open.is_empty() {
                let id = open.remove(0);
                prop_assert_eq!(tracker.on_puback(id), Ok(()));
            } else {
                let mut publish = outbound(QoS::AtLeastOnce);
                let id = tracker.register_outbound(&mut publish).unwrap().unwrap();
                prop_assert_ne!(id, 0);
                prop_assert!(!open.contains(&id));
                open.push(id);
            }
        }

        let unique: HashSet<u16> = open.iter().copied().collect();
        prop_assert_eq!(unique.len(), tracker.outbound_len());
    }
}
