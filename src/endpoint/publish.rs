//! PUBLISH handling in both directions

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use super::{Endpoint, EndpointError, Event};
use crate::keepalive::Clock;
use crate::protocol::{Packet, PacketType, PubAck, PubRec, Publish, QoS};
use crate::qos::InboundDisposition;

impl<C: Clock> Endpoint<C> {
    /// Handle PUBLISH packet from the client
    pub(super) fn handle_publish(&mut self, publish: Publish) {
        let disposition = match self.session.qos.on_inbound_publish(&publish) {
            Ok(disposition) => disposition,
            Err(e) => {
                self.protocol_error(e.into_protocol_error(PacketType::Publish));
                return;
            }
        };

        let packet_id = publish.packet_id.unwrap_or_default();
        let qos = publish.qos;

        match disposition {
            InboundDisposition::Deliver => {
                trace!(
                    "PUBLISH from {} on {} (QoS {:?}, id {})",
                    self.session.client_id,
                    publish.topic,
                    qos,
                    packet_id
                );
                self.events.push_back(Event::PublishReceived(publish));
                if self.config.auto_ack {
                    match qos {
                        QoS::AtMostOnce => {}
                        QoS::AtLeastOnce => {
                            self.transmit.push_back(Packet::PubAck(PubAck::new(packet_id)))
                        }
                        QoS::ExactlyOnce => {
                            self.transmit.push_back(Packet::PubRec(PubRec::new(packet_id)))
                        }
                    }
                }
            }
            InboundDisposition::Duplicate => {
                // Already recorded: acknowledge again, deliver nothing
                trace!(
                    "Duplicate QoS 2 PUBLISH {} from {}",
                    packet_id,
                    self.session.client_id
                );
                self.transmit.push_back(Packet::PubRec(PubRec::new(packet_id)));
            }
        }
    }

    /// Publish a message to the client
    ///
    /// Returns the assigned packet identifier for QoS 1 and 2. Fails with
    /// `PacketIdsExhausted` when all 65535 identifiers are in flight.
    pub fn publish(
        &mut self,
        topic: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
        qos: QoS,
        dup: bool,
        retain: bool,
    ) -> Result<Option<u16>, EndpointError> {
        self.ensure_connected()?;

        let topic = topic.into();
        if !is_valid_topic_name(&topic) {
            return Err(EndpointError::InvalidTopic);
        }

        let mut publish = Publish {
            dup: dup && qos != QoS::AtMostOnce,
            qos,
            retain,
            topic,
            packet_id: None,
            payload: payload.into(),
        };
        let packet_id = self.session.qos.register_outbound(&mut publish)?;

        trace!(
            "PUBLISH to {} on {} (QoS {:?}, id {:?})",
            self.session.client_id,
            publish.topic,
            qos,
            packet_id
        );
        self.transmit.push_back(Packet::Publish(publish));
        Ok(packet_id)
    }

    /// Re-send the current step of an outbound exchange under the same
    /// identifier: PUBLISH with DUP set, or PUBREL once PUBREC has arrived
    pub fn retransmit(&mut self, packet_id: u16) -> Result<(), EndpointError> {
        self.ensure_connected()?;
        let packet = self.session.qos.retransmit(packet_id)?;
        self.transmit.push_back(packet);
        Ok(())
    }
}

/// Topic names are non-empty, fit a length prefix and never carry wildcards
fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && topic.len() <= u16::MAX as usize && !topic.contains(['+', '#', '\0'])
}
