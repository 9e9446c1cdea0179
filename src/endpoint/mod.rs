//! MQTT Connection Endpoint
//!
//! The per-connection protocol state machine, free of I/O. The owner feeds it
//! decoded packets, decode failures, transport loss, timer wake-ups and
//! application actions, one at a time, and drains three outputs:
//!
//! - `poll_transmit`: packets to encode and write to the client
//! - `poll_event`: events for the application
//! - `poll_timeout`: when `handle_timeout` must be called next
//!
//! Every protocol failure ends in exactly one `Event::Closed`. Application
//! actions report misuse through `EndpointError` without touching the
//! connection.

mod connect;
mod error;
mod event;
mod publish;
mod qos;
mod subscribe;


use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use tracing::{debug, trace};

pub use error::EndpointError;
pub use event::{CloseReason, Event};

use crate::keepalive::{Clock, SystemClock};
use crate::protocol::{DecodeError, Packet, ProtocolError};
use crate::session::{ConnectionSession, ConnectionState};
use connect::PendingConnect;

/// Endpoint behaviour knobs
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// How long to wait for CONNECT (`None` = forever)
    pub connect_timeout: Option<Duration>,
    /// How long the application may take to accept or reject (`None` =
    /// forever). Expiry refuses the client with "server unavailable".
    pub accept_timeout: Option<Duration>,
    /// Send PUBACK/PUBREC/PUBREL/PUBCOMP without waiting for the application
    pub auto_ack: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            accept_timeout: Some(Duration::from_secs(30)),
            auto_ack: true,
        }
    }
}

/// Protocol engine for one client connection
#[derive(Debug)]
pub struct Endpoint<C: Clock = SystemClock> {
    config: EndpointConfig,
    clock: C,
    session: ConnectionSession,
    /// CONNECT waiting for the application's decision
    pending_connect: Option<PendingConnect>,
    /// Deadline for CONNECT to arrive
    connect_deadline: Option<Instant>,
    /// SUBSCRIBE identifiers awaiting SUBACK, with their filter count
    pending_subscribes: AHashMap<u16, usize>,
    /// UNSUBSCRIBE identifiers awaiting UNSUBACK
    pending_unsubscribes: AHashSet<u16>,
    transmit: VecDeque<Packet>,
    events: VecDeque<Event>,
}

impl Endpoint<SystemClock> {
    pub fn new(config: EndpointConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Endpoint<C> {
    pub fn with_clock(config: EndpointConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            connect_deadline: config.connect_timeout.map(|t| now + t),
            config,
            clock,
            session: ConnectionSession::new(now),
            pending_connect: None,
            pending_subscribes: AHashMap::new(),
            pending_unsubscribes: AHashSet::new(),
            transmit: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn client_id(&self) -> &Arc<str> {
        &self.session.client_id
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closing()
    }

    /// A CONNECT is waiting for `accept` or `reject`
    pub fn is_awaiting_decision(&self) -> bool {
        self.pending_connect.is_some()
    }

    /// Last inbound activity on an accepted connection
    pub fn last_activity(&self) -> Option<Instant> {
        self.session.last_activity()
    }

    /// Next packet to send to the client
    pub fn poll_transmit(&mut self) -> Option<Packet> {
        self.transmit.pop_front()
    }

    /// Next event for the application
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Earliest instant at which `handle_timeout` has work to do
    pub fn poll_timeout(&self) -> Option<Instant> {
        match self.session.state() {
            ConnectionState::AwaitingConnect => match &self.pending_connect {
                Some(pending) => pending.deadline,
                None => self.connect_deadline,
            },
            ConnectionState::Connected => self
                .session
                .keep_alive_monitor()
                .and_then(|monitor| monitor.deadline()),
            ConnectionState::Closing | ConnectionState::Closed => None,
        }
    }

    /// Process one packet from the client
    pub fn handle_packet(&mut self, packet: Packet) {
        match self.session.state() {
            ConnectionState::AwaitingConnect => {
                if let Some(pending) = self.pending_connect.as_mut() {
                    // Held until the application decides
                    pending.deferred.push(packet);
                    return;
                }
                match packet {
                    Packet::Connect(connect) => self.handle_connect(connect),
                    other => {
                        self.protocol_error(ProtocolError::ExpectedConnect(other.packet_type()))
                    }
                }
            }
            ConnectionState::Connected => {
                let now = self.clock.now();
                self.session.touch(now);
                self.dispatch(packet);
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                trace!("Dropping {} on closed connection", packet.packet_type());
            }
        }
    }

    fn dispatch(&mut self, packet: Packet) {
        trace!("Received {} from {}", packet.packet_type(), self.session.client_id);

        match packet {
            Packet::Connect(_) => self.protocol_error(ProtocolError::DuplicateConnect),
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::PubAck(puback) => self.handle_puback(puback),
            Packet::PubRec(pubrec) => self.handle_pubrec(pubrec),
            Packet::PubRel(pubrel) => self.handle_pubrel(pubrel),
            Packet::PubComp(pubcomp) => self.handle_pubcomp(pubcomp),
            Packet::Subscribe(subscribe) => self.handle_subscribe(subscribe),
            Packet::Unsubscribe(unsubscribe) => self.handle_unsubscribe(unsubscribe),
            Packet::PingReq => {
                self.transmit.push_back(Packet::PingResp);
                self.events.push_back(Event::Ping);
            }
            Packet::Disconnect => {
                debug!("Client {} disconnected", self.session.client_id);
                self.close_with(CloseReason::Graceful);
            }
            other @ (Packet::ConnAck(_)
            | Packet::SubAck(_)
            | Packet::UnsubAck(_)
            | Packet::PingResp) => {
                self.protocol_error(ProtocolError::UnexpectedPacket(other.packet_type()))
            }
        }
    }

    /// Bytes from the client could not be decoded
    pub fn handle_decode_error(&mut self, error: DecodeError) {
        if self.session.is_closing() {
            return;
        }
        self.decode_failure(error);
    }

    /// The client's byte stream ended
    pub fn handle_transport_closed(&mut self) {
        self.close_with(CloseReason::TransportClosed);
    }

    /// Check every deadline against the clock
    pub fn handle_timeout(&mut self) {
        let now = self.clock.now();
        match self.session.state() {
            ConnectionState::AwaitingConnect => self.check_connect_deadlines(now),
            ConnectionState::Connected => {
                let expired = self
                    .session
                    .keep_alive_monitor_mut()
                    .map(|monitor| monitor.poll_expired(now))
                    .unwrap_or(false);
                if expired {
                    debug!(
                        "Keep-alive expired for {} ({}s)",
                        self.session.client_id, self.session.keep_alive
                    );
                    self.close_with(CloseReason::KeepAliveExpired);
                }
            }
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
    }

    /// Close the connection from the application side
    ///
    /// Idempotent: only the first call emits `Event::Closed`.
    pub fn close(&mut self) {
        self.close_with(CloseReason::ApplicationClosed);
    }

    pub(crate) fn protocol_error(&mut self, error: ProtocolError) {
        debug!("Protocol error from {}: {}", self.session.client_id, error);
        self.close_with(CloseReason::ProtocolError(error));
    }

    /// Tear down: Closing, drop in-flight state, one close event, Closed
    pub(crate) fn close_with(&mut self, reason: CloseReason) {
        let was_connected = self.session.is_connected();
        if !self.session.transition(ConnectionState::Closing) {
            return;
        }

        self.session.discard();
        self.pending_connect = None;
        self.connect_deadline = None;
        self.pending_subscribes.clear();
        self.pending_unsubscribes.clear();

        // The will belongs to an accepted session that ended ungracefully
        let will = self.session.will.take();
        let will = if was_connected && !reason.is_graceful() {
            will
        } else {
            None
        };

        debug!("Closing {}: {}", self.session.client_id, reason);
        self.events.push_back(Event::Closed { reason, will });
        self.session.transition(ConnectionState::Closed);
    }

    /// Reject actions once the connection is going away
    fn ensure_open(&self) -> Result<(), EndpointError> {
        if self.session.is_closing() {
            Err(EndpointError::Closed)
        } else {
            Ok(())
        }
    }

    /// Actions that need CONNACK(accepted) behind them
    fn ensure_connected(&self) -> Result<(), EndpointError> {
        self.ensure_open()?;
        if self.session.is_connected() {
            Ok(())
        } else {
            Err(EndpointError::NotConnected)
        }
    }
}
