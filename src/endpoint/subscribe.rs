//! SUBSCRIBE and UNSUBSCRIBE handling

use smallvec::SmallVec;
use tracing::debug;

use super::{Endpoint, EndpointError, Event};
use crate::keepalive::Clock;
use crate::protocol::{
    Packet, PacketType, ProtocolError, SubAck, SubAckReturnCode, Subscribe, UnsubAck, Unsubscribe,
};

impl<C: Clock> Endpoint<C> {
    /// Handle SUBSCRIBE packet
    pub(super) fn handle_subscribe(&mut self, subscribe: Subscribe) {
        let packet_id = subscribe.packet_id;
        if packet_id == 0 {
            self.protocol_error(ProtocolError::ZeroPacketId(PacketType::Subscribe));
            return;
        }
        if self.pending_subscribes.contains_key(&packet_id) {
            self.protocol_error(ProtocolError::PacketIdInUse {
                packet: PacketType::Subscribe,
                packet_id,
            });
            return;
        }

        debug!(
            "SUBSCRIBE {} from {}: {} filter(s)",
            packet_id,
            self.session.client_id,
            subscribe.subscriptions.len()
        );
        self.pending_subscribes
            .insert(packet_id, subscribe.subscriptions.len());
        self.events.push_back(Event::SubscribeRequest {
            packet_id,
            subscriptions: subscribe.subscriptions,
        });
    }

    /// Handle UNSUBSCRIBE packet
    pub(super) fn handle_unsubscribe(&mut self, unsubscribe: Unsubscribe) {
        let packet_id = unsubscribe.packet_id;
        if packet_id == 0 {
            self.protocol_error(ProtocolError::ZeroPacketId(PacketType::Unsubscribe));
            return;
        }
        if !self.pending_unsubscribes.insert(packet_id) {
            self.protocol_error(ProtocolError::PacketIdInUse {
                packet: PacketType::Unsubscribe,
                packet_id,
            });
            return;
        }

        debug!(
            "UNSUBSCRIBE {} from {}: {:?}",
            packet_id, self.session.client_id, unsubscribe.filters
        );
        self.events.push_back(Event::UnsubscribeRequest {
            packet_id,
            filters: unsubscribe.filters,
        });
    }

    /// Answer a SUBSCRIBE with one return code per requested filter, in
    /// request order
    pub fn subscribe_acknowledge(
        &mut self,
        packet_id: u16,
        return_codes: impl IntoIterator<Item = SubAckReturnCode>,
    ) -> Result<(), EndpointError> {
        self.ensure_connected()?;
        let expected = *self
            .pending_subscribes
            .get(&packet_id)
            .ok_or(EndpointError::UnknownSubscribe(packet_id))?;

        let return_codes: SmallVec<[SubAckReturnCode; 4]> = return_codes.into_iter().collect();
        if return_codes.len() != expected {
            return Err(EndpointError::ReturnCodeCountMismatch {
                expected,
                actual: return_codes.len(),
            });
        }

        self.pending_subscribes.remove(&packet_id);
        self.transmit.push_back(Packet::SubAck(SubAck {
            packet_id,
            return_codes,
        }));
        Ok(())
    }

    /// Answer an UNSUBSCRIBE
    pub fn unsubscribe_acknowledge(&mut self, packet_id: u16) -> Result<(), EndpointError> {
        self.ensure_connected()?;
        if !self.pending_unsubscribes.remove(&packet_id) {
            return Err(EndpointError::UnknownUnsubscribe(packet_id));
        }
        self.transmit
            .push_back(Packet::UnsubAck(UnsubAck { packet_id }));
        Ok(())
    }
}
