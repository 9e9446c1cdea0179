//! QoS acknowledgment handling (PUBACK, PUBREC, PUBREL, PUBCOMP)

use tracing::trace;

use super::{Endpoint, EndpointError, Event};
use crate::keepalive::Clock;
use crate::protocol::{Packet, PacketType, PubAck, PubComp, PubRec, PubRel};
use crate::qos::{Direction, Stage};

impl<C: Clock> Endpoint<C> {
    /// Handle PUBACK packet
    pub(super) fn handle_puback(&mut self, puback: PubAck) {
        match self.session.qos.on_puback(puback.packet_id) {
            Ok(()) => self.events.push_back(Event::PublishAcknowledged {
                packet_id: puback.packet_id,
            }),
            Err(e) => self.protocol_error(e.into_protocol_error(PacketType::PubAck)),
        }
    }

    /// Handle PUBREC packet
    pub(super) fn handle_pubrec(&mut self, pubrec: PubRec) {
        let packet_id = pubrec.packet_id;
        if let Err(e) = self.session.qos.on_pubrec(packet_id) {
            self.protocol_error(e.into_protocol_error(PacketType::PubRec));
            return;
        }

        self.events.push_back(Event::PublishReceivedAck { packet_id });
        if self.config.auto_ack {
            self.transmit.push_back(Packet::PubRel(PubRel::new(packet_id)));
        }
    }

    /// Handle PUBREL packet
    pub(super) fn handle_pubrel(&mut self, pubrel: PubRel) {
        let packet_id = pubrel.packet_id;
        if let Err(e) = self.session.qos.on_pubrel(packet_id) {
            self.protocol_error(e.into_protocol_error(PacketType::PubRel));
            return;
        }

        self.events.push_back(Event::PublishReleased { packet_id });
        if self.config.auto_ack {
            self.transmit.push_back(Packet::PubComp(PubComp::new(packet_id)));
        }
    }

    /// Handle PUBCOMP packet
    pub(super) fn handle_pubcomp(&mut self, pubcomp: PubComp) {
        match self.session.qos.on_pubcomp(pubcomp.packet_id) {
            Ok(()) => self.events.push_back(Event::PublishCompleted {
                packet_id: pubcomp.packet_id,
            }),
            Err(e) => self.protocol_error(e.into_protocol_error(PacketType::PubComp)),
        }
    }

    /// Send PUBACK for an inbound QoS 1 publish
    pub fn publish_acknowledge(&mut self, packet_id: u16) -> Result<(), EndpointError> {
        self.check_ack_id(packet_id)?;
        self.queue_ack(Packet::PubAck(PubAck::new(packet_id)), packet_id);
        Ok(())
    }

    /// Send PUBREC for an inbound QoS 2 publish that is awaiting PUBREL
    pub fn publish_received(&mut self, packet_id: u16) -> Result<(), EndpointError> {
        self.check_ack_id(packet_id)?;
        if !self.session.qos.is_inbound_pending(packet_id) {
            return Err(EndpointError::UnknownPacketId(packet_id));
        }
        self.queue_ack(Packet::PubRec(PubRec::new(packet_id)), packet_id);
        Ok(())
    }

    /// Send PUBREL for an outbound QoS 2 publish the client has PUBREC'd
    pub fn publish_release(&mut self, packet_id: u16) -> Result<(), EndpointError> {
        self.check_ack_id(packet_id)?;
        match self.session.qos.get(Direction::Outbound, packet_id) {
            Some(entry) if entry.stage == Stage::ReceivedAck => {}
            Some(_) => return Err(EndpointError::UnexpectedStage(packet_id)),
            None => return Err(EndpointError::UnknownPacketId(packet_id)),
        }
        self.queue_ack(Packet::PubRel(PubRel::new(packet_id)), packet_id);
        Ok(())
    }

    /// Send PUBCOMP for an inbound QoS 2 publish the client has released
    pub fn publish_complete(&mut self, packet_id: u16) -> Result<(), EndpointError> {
        self.check_ack_id(packet_id)?;
        if self.session.qos.is_inbound_pending(packet_id) {
            // PUBREL has not arrived yet
            return Err(EndpointError::UnexpectedStage(packet_id));
        }
        self.queue_ack(Packet::PubComp(PubComp::new(packet_id)), packet_id);
        Ok(())
    }

    fn check_ack_id(&self, packet_id: u16) -> Result<(), EndpointError> {
        self.ensure_connected()?;
        if packet_id == 0 {
            return Err(EndpointError::ZeroPacketId);
        }
        Ok(())
    }

    fn queue_ack(&mut self, packet: Packet, packet_id: u16) {
        trace!(
            "{} {} to {}",
            packet.packet_type(),
            packet_id,
            self.session.client_id
        );
        self.transmit.push_back(packet);
    }
}
