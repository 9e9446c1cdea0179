//! Application-facing events

use crate::protocol::{
    Connect, ConnectReturnCode, DecodeError, ProtocolError, Publish, Subscription, Will,
};

/// Something the application needs to know about or decide on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A client sent CONNECT; answer with `accept` or `reject`
    ConnectRequest(Box<Connect>),
    /// Inbound PUBLISH, delivered at most once per QoS 2 identifier
    PublishReceived(Publish),
    /// Outbound QoS 1 exchange completed by PUBACK
    PublishAcknowledged { packet_id: u16 },
    /// Outbound QoS 2: PUBREC arrived
    PublishReceivedAck { packet_id: u16 },
    /// Inbound QoS 2: PUBREL arrived
    PublishReleased { packet_id: u16 },
    /// Outbound QoS 2 exchange completed by PUBCOMP
    PublishCompleted { packet_id: u16 },
    /// SUBSCRIBE; answer with `subscribe_acknowledge`
    SubscribeRequest {
        packet_id: u16,
        subscriptions: Vec<Subscription>,
    },
    /// UNSUBSCRIBE; answer with `unsubscribe_acknowledge`
    UnsubscribeRequest { packet_id: u16, filters: Vec<String> },
    /// PINGREQ (PINGRESP already queued)
    Ping,
    /// The connection is gone. Emitted exactly once, always last.
    ///
    /// `will` is set when the close was ungraceful and the client registered
    /// one; publishing it is up to the broker.
    Closed {
        reason: CloseReason,
        will: Option<Will>,
    },
}

/// Why a connection closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent DISCONNECT
    Graceful,
    /// Client broke the protocol
    ProtocolError(ProtocolError),
    /// Client sent bytes that are not an MQTT packet
    DecodeError(DecodeError),
    /// No traffic for 1.5x the keep-alive interval
    KeepAliveExpired,
    /// CONNECT refused with this CONNACK code
    Rejected(ConnectReturnCode),
    /// No CONNECT arrived in time
    Timeout,
    /// Peer closed or reset the byte stream
    TransportClosed,
    /// The application called `close()`
    ApplicationClosed,
}

impl CloseReason {
    pub fn is_graceful(&self) -> bool {
        matches!(self, CloseReason::Graceful)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Graceful => write!(f, "client disconnected"),
            CloseReason::ProtocolError(e) => write!(f, "protocol error: {}", e),
            CloseReason::DecodeError(e) => write!(f, "decode error: {}", e),
            CloseReason::KeepAliveExpired => write!(f, "keep-alive expired"),
            CloseReason::Rejected(code) => write!(f, "connection refused: {}", code),
            CloseReason::Timeout => write!(f, "no CONNECT received in time"),
            CloseReason::TransportClosed => write!(f, "transport closed"),
            CloseReason::ApplicationClosed => write!(f, "closed by application"),
        }
    }
}

impl From<ProtocolError> for CloseReason {
    fn from(e: ProtocolError) -> Self {
        CloseReason::ProtocolError(e)
    }
}

impl From<DecodeError> for CloseReason {
    fn from(e: DecodeError) -> Self {
        CloseReason::DecodeError(e)
    }
}
