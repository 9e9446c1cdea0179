//! Protocol error types

use std::fmt;

use super::PacketType;

/// Errors that can occur during packet decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in buffer
    InsufficientData,
    /// Invalid packet type
    InvalidPacketType(u8),
    /// Invalid remaining length encoding
    InvalidRemainingLength,
    /// Invalid protocol name
    InvalidProtocolName,
    /// Protocol level the server does not speak
    UnsupportedProtocolVersion(u8),
    /// Invalid QoS value
    InvalidQoS(u8),
    /// Invalid UTF-8 string
    InvalidUtf8,
    /// Invalid packet flags
    InvalidFlags,
    /// Malformed packet
    MalformedPacket(&'static str),
    /// Packet too large
    PacketTooLarge,
    /// Invalid return code
    InvalidReturnCode(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidPacketType(t) => write!(f, "invalid packet type: {}", t),
            Self::InvalidRemainingLength => write!(f, "invalid remaining length encoding"),
            Self::InvalidProtocolName => write!(f, "invalid protocol name"),
            Self::UnsupportedProtocolVersion(v) => {
                write!(f, "unsupported protocol version: {}", v)
            }
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::InvalidFlags => write!(f, "invalid packet flags"),
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::InvalidReturnCode(r) => write!(f, "invalid return code: {}", r),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during packet encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Packet too large
    PacketTooLarge,
    /// String too long
    StringTooLong,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::StringTooLong => write!(f, "string too long"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Protocol violations committed by the remote client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First packet on the connection was not CONNECT
    ExpectedConnect(PacketType),
    /// A second CONNECT on an established connection
    DuplicateConnect,
    /// Packet type the client must never send, or not valid in the current state
    UnexpectedPacket(PacketType),
    /// Packet identifier 0
    ZeroPacketId(PacketType),
    /// Acknowledgment for an identifier with no in-flight exchange
    UnknownPacketId { packet: PacketType, packet_id: u16 },
    /// Acknowledgment that does not match the stage of the exchange
    UnexpectedStage { packet: PacketType, packet_id: u16 },
    /// SUBSCRIBE or UNSUBSCRIBE reusing an identifier still awaiting its ack
    PacketIdInUse { packet: PacketType, packet_id: u16 },
    /// No packet identifier left for an exchange the engine had to start
    PacketIdsExhausted,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpectedConnect(t) => write!(f, "expected CONNECT, got {}", t),
            Self::DuplicateConnect => write!(f, "duplicate CONNECT"),
            Self::UnexpectedPacket(t) => write!(f, "unexpected {} packet", t),
            Self::ZeroPacketId(t) => write!(f, "{} with packet identifier 0", t),
            Self::UnknownPacketId { packet, packet_id } => {
                write!(f, "{} for unknown packet identifier {}", packet, packet_id)
            }
            Self::UnexpectedStage { packet, packet_id } => {
                write!(f, "{} out of order for packet identifier {}", packet, packet_id)
            }
            Self::PacketIdInUse { packet, packet_id } => {
                write!(f, "{} reuses pending packet identifier {}", packet, packet_id)
            }
            Self::PacketIdsExhausted => write!(f, "packet identifier space exhausted"),
        }
    }
}

impl std::error::Error for ProtocolError {}
