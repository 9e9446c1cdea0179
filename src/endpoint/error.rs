//! Errors returned to the application by endpoint actions
//!
//! These never close the connection. Misbehaviour by the client is reported
//! through `Event::Closed` instead.

use crate::qos::QosError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// The action needs an accepted connection
    NotConnected,
    /// The connection is closing or closed
    Closed,
    /// accept/reject without a CONNECT awaiting a decision
    NoPendingConnect,
    /// reject called with the accepted return code
    InvalidRejectCode,
    /// Every outbound packet identifier is in flight
    PacketIdsExhausted,
    /// Packet identifier 0
    ZeroPacketId,
    /// No exchange in flight for this identifier
    UnknownPacketId(u16),
    /// The exchange is not at a stage where this step applies
    UnexpectedStage(u16),
    /// Topic name is empty or contains a wildcard
    InvalidTopic,
    /// No SUBSCRIBE awaiting a SUBACK with this identifier
    UnknownSubscribe(u16),
    /// SUBACK must carry one return code per requested filter
    ReturnCodeCountMismatch { expected: usize, actual: usize },
    /// No UNSUBSCRIBE awaiting an UNSUBACK with this identifier
    UnknownUnsubscribe(u16),
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointError::NotConnected => write!(f, "connection not accepted yet"),
            EndpointError::Closed => write!(f, "connection closed"),
            EndpointError::NoPendingConnect => write!(f, "no CONNECT awaiting a decision"),
            EndpointError::InvalidRejectCode => {
                write!(f, "a rejection needs a failure return code")
            }
            EndpointError::PacketIdsExhausted => write!(f, "all packet identifiers are in flight"),
            EndpointError::ZeroPacketId => write!(f, "packet identifier 0 is invalid"),
            EndpointError::UnknownPacketId(id) => write!(f, "no exchange in flight for {}", id),
            EndpointError::UnexpectedStage(id) => write!(f, "exchange {} is at another stage", id),
            EndpointError::InvalidTopic => write!(f, "invalid topic name"),
            EndpointError::UnknownSubscribe(id) => write!(f, "no SUBSCRIBE pending for {}", id),
            EndpointError::ReturnCodeCountMismatch { expected, actual } => write!(
                f,
                "SUBACK needs {} return codes, got {}",
                expected, actual
            ),
            EndpointError::UnknownUnsubscribe(id) => {
                write!(f, "no UNSUBSCRIBE pending for {}", id)
            }
        }
    }
}

impl std::error::Error for EndpointError {}

impl From<QosError> for EndpointError {
    fn from(e: QosError) -> Self {
        match e {
            QosError::ZeroPacketId => EndpointError::ZeroPacketId,
            QosError::UnknownPacketId(id) => EndpointError::UnknownPacketId(id),
            QosError::UnexpectedStage(id) => EndpointError::UnexpectedStage(id),
            QosError::PacketIdsExhausted => EndpointError::PacketIdsExhausted,
        }
    }
}
