//! QoS in-flight tracking
//!
//! Owns the two packet identifier spaces of a connection:
//!
//! - outbound: engine-assigned identifiers for server -> client publishes
//!   (QoS 1 and QoS 2)
//! - inbound: client-assigned identifiers for client -> server QoS 2
//!   publishes awaiting PUBREL
//!
//! The spaces are independent; the same numeric identifier may be in flight
//! in both at once. QoS 0 is never tracked, and inbound QoS 1 needs no state
//! because the PUBACK completes the exchange immediately.

use ahash::AHashMap;

use crate::protocol::{Packet, PacketType, ProtocolError, PubRel, Publish, QoS};

#[cfg(test)]
mod tests;

/// Number of usable packet identifiers (1..=65535)
pub const PACKET_ID_SPACE: usize = u16::MAX as usize;

/// Which side assigned the packet identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client -> server publish, identifier chosen by the client
    Inbound,
    /// Server -> client publish, identifier chosen by the engine
    Outbound,
}

/// Progress of an in-flight exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Outbound PUBLISH sent, waiting for PUBACK (QoS 1) or PUBREC (QoS 2)
    Sent,
    /// Outbound QoS 2: PUBREC received and PUBREL sent, waiting for PUBCOMP
    ReceivedAck,
    /// Inbound QoS 2: PUBLISH received and PUBREC sent, waiting for PUBREL
    Received,
}

/// One publish exchange that has not completed yet
#[derive(Debug, Clone)]
pub struct InFlightMessage {
    pub packet_id: u16,
    pub direction: Direction,
    pub qos: QoS,
    pub stage: Stage,
    /// Outbound only: the PUBLISH as sent, kept for retransmission
    pub publish: Option<Publish>,
}

/// Tracker failures, mapped by the endpoint onto protocol errors (for
/// client packets) or application errors (for application actions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosError {
    /// Packet identifier 0
    ZeroPacketId,
    /// No exchange with this identifier in the relevant space
    UnknownPacketId(u16),
    /// An exchange exists but is not at a stage that accepts this step
    UnexpectedStage(u16),
    /// Every outbound identifier is in flight
    PacketIdsExhausted,
}

impl QosError {
    /// Describe the failure as a violation committed by `packet`
    pub fn into_protocol_error(self, packet: PacketType) -> ProtocolError {
        match self {
            QosError::ZeroPacketId => ProtocolError::ZeroPacketId(packet),
            QosError::UnknownPacketId(packet_id) => {
                ProtocolError::UnknownPacketId { packet, packet_id }
            }
            QosError::UnexpectedStage(packet_id) => {
                ProtocolError::UnexpectedStage { packet, packet_id }
            }
            QosError::PacketIdsExhausted => ProtocolError::PacketIdsExhausted,
        }
    }
}

impl std::fmt::Display for QosError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QosError::ZeroPacketId => write!(f, "packet identifier 0 is invalid"),
            QosError::UnknownPacketId(id) => write!(f, "no exchange in flight for {}", id),
            QosError::UnexpectedStage(id) => write!(f, "exchange {} is at another stage", id),
            QosError::PacketIdsExhausted => write!(f, "all packet identifiers are in flight"),
        }
    }
}

impl std::error::Error for QosError {}

/// What the endpoint should do with an inbound PUBLISH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    /// First delivery: hand to the application
    Deliver,
    /// QoS 2 re-delivery of an identifier still awaiting PUBREL: acknowledge
    /// again without handing it to the application
    Duplicate,
}

/// Per-connection in-flight state for both directions
#[derive(Debug)]
pub struct QosTracker {
    outbound: AHashMap<u16, InFlightMessage>,
    inbound: AHashMap<u16, InFlightMessage>,
    next_packet_id: u16,
}

impl QosTracker {
    pub fn new() -> Self {
        Self {
            outbound: AHashMap::new(),
            inbound: AHashMap::new(),
            next_packet_id: 1,
        }
    }

    /// Allocate the next free outbound identifier
    ///
    /// Counts upward from the last assignment, wraps from 65535 to 1 and
    /// skips identifiers still in flight.
    fn allocate_packet_id(&mut self) -> Result<u16, QosError> {
        if self.outbound.len() >= PACKET_ID_SPACE {
            return Err(QosError::PacketIdsExhausted);
        }

        loop {
            let id = self.next_packet_id;
            self.next_packet_id = if id == u16::MAX { 1 } else { id + 1 };

            if !self.outbound.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// Start an outbound exchange
    ///
    /// Assigns an identifier for QoS 1/2 (written into `publish.packet_id`)
    /// and records it in stage `Sent`. QoS 0 is left untracked.
    pub fn register_outbound(&mut self, publish: &mut Publish) -> Result<Option<u16>, QosError> {
        if publish.qos == QoS::AtMostOnce {
            publish.packet_id = None;
            return Ok(None);
        }

        let packet_id = self.allocate_packet_id()?;
        publish.packet_id = Some(packet_id);
        self.outbound.insert(
            packet_id,
            InFlightMessage {
                packet_id,
                direction: Direction::Outbound,
                qos: publish.qos,
                stage: Stage::Sent,
                publish: Some(publish.clone()),
            },
        );

        Ok(Some(packet_id))
    }

    /// PUBACK from the client: completes an outbound QoS 1 exchange
    pub fn on_puback(&mut self, packet_id: u16) -> Result<(), QosError> {
        self.complete_outbound(packet_id, QoS::AtLeastOnce, Stage::Sent)
    }

    /// PUBREC from the client: outbound QoS 2 moves to `ReceivedAck`
    pub fn on_pubrec(&mut self, packet_id: u16) -> Result<(), QosError> {
        let entry = self.outbound_entry(packet_id)?;
        if entry.qos != QoS::ExactlyOnce || entry.stage != Stage::Sent {
            return Err(QosError::UnexpectedStage(packet_id));
        }
        entry.stage = Stage::ReceivedAck;
        // The message itself is delivered; only PUBREL can be resent from here
        entry.publish = None;
        Ok(())
    }

    /// PUBCOMP from the client: completes an outbound QoS 2 exchange
    pub fn on_pubcomp(&mut self, packet_id: u16) -> Result<(), QosError> {
        self.complete_outbound(packet_id, QoS::ExactlyOnce, Stage::ReceivedAck)
    }

    fn outbound_entry(&mut self, packet_id: u16) -> Result<&mut InFlightMessage, QosError> {
        if packet_id == 0 {
            return Err(QosError::ZeroPacketId);
        }
        self.outbound
            .get_mut(&packet_id)
            .ok_or(QosError::UnknownPacketId(packet_id))
    }

    fn complete_outbound(&mut self, packet_id: u16, qos: QoS, stage: Stage) -> Result<(), QosError> {
        let entry = self.outbound_entry(packet_id)?;
        if entry.qos != qos || entry.stage != stage {
            return Err(QosError::UnexpectedStage(packet_id));
        }
        self.outbound.remove(&packet_id);
        Ok(())
    }

    /// Inbound PUBLISH from the client
    ///
    /// QoS 2 identifiers are recorded on first sight; a repeat before PUBREL
    /// is reported as `Duplicate` regardless of the DUP flag.
    pub fn on_inbound_publish(&mut self, publish: &Publish) -> Result<InboundDisposition, QosError> {
        match publish.qos {
            QoS::AtMostOnce => Ok(InboundDisposition::Deliver),
            QoS::AtLeastOnce => match publish.packet_id {
                Some(0) | None => Err(QosError::ZeroPacketId),
                Some(_) => Ok(InboundDisposition::Deliver),
            },
            QoS::ExactlyOnce => {
                let packet_id = match publish.packet_id {
                    Some(0) | None => return Err(QosError::ZeroPacketId),
                    Some(id) => id,
                };

                if self.inbound.contains_key(&packet_id) {
                    return Ok(InboundDisposition::Duplicate);
                }

                self.inbound.insert(
                    packet_id,
                    InFlightMessage {
                        packet_id,
                        direction: Direction::Inbound,
                        qos: QoS::ExactlyOnce,
                        stage: Stage::Received,
                        publish: None,
                    },
                );
                Ok(InboundDisposition::Deliver)
            }
        }
    }

    /// PUBREL from the client: completes an inbound QoS 2 exchange
    pub fn on_pubrel(&mut self, packet_id: u16) -> Result<(), QosError> {
        if packet_id == 0 {
            return Err(QosError::ZeroPacketId);
        }
        self.inbound
            .remove(&packet_id)
            .map(|_| ())
            .ok_or(QosError::UnknownPacketId(packet_id))
    }

    /// Rebuild the packet that repeats the current step of an outbound exchange
    ///
    /// Stage `Sent` yields the original PUBLISH with DUP set; stage
    /// `ReceivedAck` yields the PUBREL.
    pub fn retransmit(&mut self, packet_id: u16) -> Result<Packet, QosError> {
        let entry = self.outbound_entry(packet_id)?;
        match (entry.stage, entry.publish.as_mut()) {
            (Stage::Sent, Some(publish)) => {
                publish.dup = true;
                Ok(Packet::Publish(publish.clone()))
            }
            (Stage::ReceivedAck, _) => Ok(Packet::PubRel(PubRel::new(packet_id))),
            _ => Err(QosError::UnexpectedStage(packet_id)),
        }
    }

    /// Look up an in-flight exchange
    pub fn get(&self, direction: Direction, packet_id: u16) -> Option<&InFlightMessage> {
        match direction {
            Direction::Inbound => self.inbound.get(&packet_id),
            Direction::Outbound => self.outbound.get(&packet_id),
        }
    }

    pub fn is_inbound_pending(&self, packet_id: u16) -> bool {
        self.inbound.contains_key(&packet_id)
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Drop every in-flight exchange (connection closing)
    pub fn clear(&mut self) {
        self.outbound.clear();
        self.inbound.clear();
    }
}

impl Default for QosTracker {
    fn default() -> Self {
        Self::new()
    }
}
