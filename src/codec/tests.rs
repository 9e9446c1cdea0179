//! MQTT v3.1.1 codec tests
//!
//! Raw byte layouts follow sections 2 and 3 of the MQTT v3.1.1 specification.

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;
use smallvec::smallvec;

use crate::codec::{read_remaining_length, write_remaining_length, Decoder, Encoder};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, DecodeError, Packet, ProtocolVersion, PubRel, Publish,
    QoS, SubAck, SubAckReturnCode, Subscribe, Subscription, UnsubAck, Will,
};

fn encode_packet(packet: &Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    Encoder::new().encode(packet, &mut buf).unwrap();
    buf
}

fn decode_packet(buf: &[u8]) -> Result<Packet, DecodeError> {
    match Decoder::new().decode(buf)? {
        Some((packet, _)) => Ok(packet),
        None => Err(DecodeError::InsufficientData),
    }
}

// ============================================================================
// CONNECT
// ============================================================================

#[test]
fn test_decode_connect_v311_raw() {
    let raw = [
        0x10, 0x0E, // fixed header
        0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
        0x04, // level
        0x02, // clean session
        0x00, 0x3C, // keep alive 60
        0x00, 0x02, b'c', b'1', // client id
    ];

    let packet = decode_packet(&raw).unwrap();
    assert_eq!(
        packet,
        Packet::Connect(Box::new(Connect {
            protocol_version: ProtocolVersion::V311,
            client_id: "c1".to_string(),
            clean_session: true,
            keep_alive: 60,
            username: None,
            password: None,
            will: None,
        }))
    );
}

#[test]
fn test_connect_with_will_and_credentials() {
    let packet = Packet::Connect(Box::new(Connect {
        protocol_version: ProtocolVersion::V311,
        client_id: "sensor-7".to_string(),
        clean_session: false,
        keep_alive: 30,
        username: Some("user".to_string()),
        password: Some(Bytes::from_static(b"secret")),
        will: Some(Will {
            topic: "status/sensor-7".to_string(),
            payload: Bytes::from_static(b"offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
    }));

    let encoded = encode_packet(&packet);
    // username + password + will retain + will QoS 1 + will flag
    assert_eq!(encoded[9], 0x80 | 0x40 | 0x20 | 0x08 | 0x04);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_connect_v31_uses_mqisdp() {
    let packet = Packet::Connect(Box::new(Connect {
        protocol_version: ProtocolVersion::V31,
        client_id: "legacy".to_string(),
        ..Default::default()
    }));

    let encoded = encode_packet(&packet);
    assert_eq!(&encoded[4..10], b"MQIsdp");
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_connect_unsupported_level() {
    let raw = [
        0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 0x3C, 0x00, 0x02, b'c',
        b'1',
    ];
    assert_eq!(
        decode_packet(&raw),
        Err(DecodeError::UnsupportedProtocolVersion(5))
    );
}

#[test]
fn test_connect_level_must_match_protocol_name() {
    // "MQTT" only ever comes with level 4; level 3 belongs to "MQIsdp"
    let raw = [
        0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x03, 0x02, 0x00, 0x3C, 0x00, 0x02, b'c',
        b'1',
    ];
    assert_eq!(
        decode_packet(&raw),
        Err(DecodeError::UnsupportedProtocolVersion(3))
    );
}

#[test]
fn test_connect_bad_protocol_name() {
    let raw = [
        0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'X', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x02, b'c',
        b'1',
    ];
    assert_eq!(decode_packet(&raw), Err(DecodeError::InvalidProtocolName));
}

#[test]
fn test_connect_reserved_flag_rejected() {
    let raw = [
        0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x03, 0x00, 0x3C, 0x00, 0x02, b'c',
        b'1',
    ];
    assert_eq!(decode_packet(&raw), Err(DecodeError::InvalidFlags));
}

#[test]
fn test_connect_password_without_username_rejected() {
    let raw = [
        0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x42, 0x00, 0x3C, 0x00, 0x02, b'c',
        b'1',
    ];
    assert_eq!(decode_packet(&raw), Err(DecodeError::InvalidFlags));
}

// ============================================================================
// CONNACK
// ============================================================================

#[test]
fn test_encode_connack_bytes() {
    let packet = Packet::ConnAck(ConnAck {
        session_present: true,
        return_code: ConnectReturnCode::Accepted,
    });
    assert_eq!(&encode_packet(&packet)[..], &[0x20, 0x02, 0x01, 0x00]);
}

#[test]
fn test_refused_connack_never_sets_session_present() {
    let packet = Packet::ConnAck(ConnAck {
        session_present: true,
        return_code: ConnectReturnCode::NotAuthorized,
    });
    assert_eq!(&encode_packet(&packet)[..], &[0x20, 0x02, 0x00, 0x05]);
}

// ============================================================================
// PUBLISH
// ============================================================================

#[test]
fn test_publish_qos1_layout() {
    let packet = Packet::Publish(Publish {
        dup: true,
        qos: QoS::AtLeastOnce,
        retain: false,
        topic: "a/b".into(),
        packet_id: Some(10),
        payload: Bytes::from_static(b"hi"),
    });

    let encoded = encode_packet(&packet);
    assert_eq!(
        &encoded[..],
        &[0x3A, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x0A, b'h', b'i']
    );
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_publish_zero_packet_id_is_not_a_framing_error() {
    let raw = [0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x00];
    match decode_packet(&raw).unwrap() {
        Packet::Publish(p) => assert_eq!(p.packet_id, Some(0)),
        other => panic!("expected PUBLISH, got {:?}", other),
    }
}

#[test]
fn test_publish_qos3_rejected() {
    let raw = [0x36, 0x05, 0x00, 0x01, b't', 0x00, 0x01];
    assert_eq!(decode_packet(&raw), Err(DecodeError::InvalidQoS(3)));
}

#[test]
fn test_publish_dup_with_qos0_rejected() {
    let raw = [0x38, 0x03, 0x00, 0x01, b't'];
    assert!(matches!(
        decode_packet(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_publish_wildcard_topic_rejected() {
    let raw = [0x30, 0x03, 0x00, 0x01, b'#'];
    assert!(matches!(
        decode_packet(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

// ============================================================================
// Acknowledgments
// ============================================================================

#[test]
fn test_pubrel_requires_flags_0010() {
    assert_eq!(
        decode_packet(&[0x62, 0x02, 0x00, 0x07]).unwrap(),
        Packet::PubRel(PubRel::new(7))
    );
    assert_eq!(
        decode_packet(&[0x60, 0x02, 0x00, 0x07]),
        Err(DecodeError::InvalidFlags)
    );
}

#[test]
fn test_ack_with_wrong_length_rejected() {
    assert!(matches!(
        decode_packet(&[0x40, 0x03, 0x00, 0x07, 0x00]),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_encode_unsuback_bytes() {
    let packet = Packet::UnsubAck(UnsubAck { packet_id: 0x0102 });
    assert_eq!(&encode_packet(&packet)[..], &[0xB0, 0x02, 0x01, 0x02]);
}

// ============================================================================
// SUBSCRIBE / SUBACK
// ============================================================================

#[test]
fn test_subscribe_preserves_filter_order() {
    let packet = Packet::Subscribe(Subscribe {
        packet_id: 1,
        subscriptions: vec![
            Subscription::new("a/b", QoS::AtLeastOnce),
            Subscription::new("c/#", QoS::ExactlyOnce),
            Subscription::new("d/+", QoS::AtMostOnce),
        ],
    });

    assert_eq!(decode_packet(&encode_packet(&packet)).unwrap(), packet);
}

#[test]
fn test_subscribe_reserved_qos_bits_rejected() {
    let raw = [0x82, 0x06, 0x00, 0x01, 0x00, 0x01, b'a', 0x04];
    assert!(matches!(
        decode_packet(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_subscribe_without_filters_rejected() {
    let raw = [0x82, 0x02, 0x00, 0x01];
    assert!(matches!(
        decode_packet(&raw),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_encode_suback_bytes() {
    let packet = Packet::SubAck(SubAck {
        packet_id: 1,
        return_codes: smallvec![
            SubAckReturnCode::GrantedQoS1,
            SubAckReturnCode::Failure,
            SubAckReturnCode::GrantedQoS0,
        ],
    });
    assert_eq!(
        &encode_packet(&packet)[..],
        &[0x90, 0x05, 0x00, 0x01, 0x01, 0x80, 0x00]
    );
}

// ============================================================================
// Framing
// ============================================================================

#[test]
fn test_partial_packet_needs_more_bytes() {
    let encoded = encode_packet(&Packet::PubRel(PubRel::new(3)));
    let decoder = Decoder::new();
    assert_eq!(decoder.decode(&encoded[..1]).unwrap(), None);
    assert_eq!(decoder.decode(&encoded[..3]).unwrap(), None);
    assert_eq!(
        decoder.decode(&encoded).unwrap(),
        Some((Packet::PubRel(PubRel::new(3)), 4))
    );
}

#[test]
fn test_two_packets_in_one_buffer() {
    let mut buf = encode_packet(&Packet::PingReq);
    buf.extend_from_slice(&encode_packet(&Packet::Disconnect));

    let decoder = Decoder::new();
    let (first, consumed) = decoder.decode(&buf).unwrap().unwrap();
    assert_eq!(first, Packet::PingReq);
    let (second, _) = decoder.decode(&buf[consumed..]).unwrap().unwrap();
    assert_eq!(second, Packet::Disconnect);
}

#[test]
fn test_packet_too_large() {
    let decoder = Decoder::new().with_max_packet_size(4);
    let raw = [0x30, 0x05, 0x00, 0x01, b't', b'x', b'y'];
    assert_eq!(decoder.decode(&raw), Err(DecodeError::PacketTooLarge));
}

#[test]
fn test_unknown_packet_type() {
    assert_eq!(
        decode_packet(&[0xF0, 0x00]),
        Err(DecodeError::InvalidPacketType(15))
    );
}

#[test]
fn test_pingreq_with_payload_rejected() {
    assert!(matches!(
        decode_packet(&[0xC0, 0x01, 0x00]),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_remaining_length_boundaries() {
    for value in [0u32, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, 268_435_455] {
        let mut buf = BytesMut::new();
        let written = write_remaining_length(&mut buf, value).unwrap();
        assert_eq!(read_remaining_length(&buf).unwrap(), (value, written));
    }

    assert_eq!(
        read_remaining_length(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
        Err(DecodeError::InvalidRemainingLength)
    );
    assert_eq!(
        read_remaining_length(&[0xFF, 0xFF]),
        Err(DecodeError::InsufficientData)
    );
}
