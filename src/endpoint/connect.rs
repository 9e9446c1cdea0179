//! CONNECT handling and the accept/reject decision

use std::time::Instant;

use tracing::{debug, info, warn};

use super::{CloseReason, Endpoint, EndpointError, Event};
use crate::keepalive::Clock;
use crate::protocol::{ConnAck, Connect, ConnectReturnCode, DecodeError, Packet};
use crate::session::ConnectionState;

/// A CONNECT handed to the application, not yet answered
#[derive(Debug)]
pub(super) struct PendingConnect {
    /// Decision deadline (`None` = wait forever)
    pub(super) deadline: Option<Instant>,
    /// Packets that arrived behind the CONNECT, replayed after accept
    pub(super) deferred: Vec<Packet>,
}

impl<C: Clock> Endpoint<C> {
    /// Handle CONNECT packet
    pub(super) fn handle_connect(&mut self, connect: Box<Connect>) {
        debug!(
            "CONNECT from {} (protocol {:?}, keep-alive {}s, clean {})",
            connect.client_id, connect.protocol_version, connect.keep_alive, connect.clean_session
        );

        self.session.populate(&connect);
        self.connect_deadline = None;

        // A zero-length identifier only makes sense for a clean session
        if connect.client_id.is_empty() && !connect.clean_session {
            self.refuse(ConnectReturnCode::IdentifierRejected);
            return;
        }

        let now = self.clock.now();
        self.pending_connect = Some(PendingConnect {
            deadline: self.config.accept_timeout.map(|t| now + t),
            deferred: Vec::new(),
        });
        self.events.push_back(Event::ConnectRequest(connect));
    }

    /// Accept the pending CONNECT
    ///
    /// Sends CONNACK(accepted), starts keep-alive supervision and replays any
    /// packets that arrived while the decision was outstanding.
    /// `session_present` is forced off for clean sessions.
    pub fn accept(&mut self, session_present: bool) -> Result<(), EndpointError> {
        self.ensure_open()?;
        let pending = self
            .pending_connect
            .take()
            .ok_or(EndpointError::NoPendingConnect)?;

        let session_present = session_present && !self.session.clean_session;
        self.transmit.push_back(Packet::ConnAck(ConnAck {
            session_present,
            return_code: ConnectReturnCode::Accepted,
        }));
        self.session.transition(ConnectionState::Connected);
        let now = self.clock.now();
        self.session.start_keep_alive(now);

        info!(
            "Client {} connected (session present: {})",
            self.session.client_id, session_present
        );

        for packet in pending.deferred {
            if self.session.is_closing() {
                break;
            }
            self.handle_packet(packet);
        }

        Ok(())
    }

    /// Refuse the pending CONNECT with a failure return code
    pub fn reject(&mut self, code: ConnectReturnCode) -> Result<(), EndpointError> {
        self.ensure_open()?;
        if code.is_accepted() {
            return Err(EndpointError::InvalidRejectCode);
        }
        if self.pending_connect.is_none() {
            return Err(EndpointError::NoPendingConnect);
        }
        self.refuse(code);
        Ok(())
    }

    /// CONNACK with a failure code, then close
    fn refuse(&mut self, code: ConnectReturnCode) {
        info!("Refusing client {}: {}", self.session.client_id, code);
        self.transmit.push_back(Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: code,
        }));
        self.close_with(CloseReason::Rejected(code));
    }

    pub(super) fn check_connect_deadlines(&mut self, now: Instant) {
        if let Some(pending) = &self.pending_connect {
            if pending.deadline.is_some_and(|deadline| now >= deadline) {
                warn!(
                    "No accept decision for {} in time, refusing",
                    self.session.client_id
                );
                self.refuse(ConnectReturnCode::ServerUnavailable);
            }
            return;
        }

        if self.connect_deadline.is_some_and(|deadline| now >= deadline) {
            debug!("No CONNECT received in time");
            self.close_with(CloseReason::Timeout);
        }
    }

    /// Undecodable bytes: close, answering an unsupported protocol level with
    /// CONNACK(1) if the handshake has not started yet
    pub(super) fn decode_failure(&mut self, error: DecodeError) {
        let awaiting_connect = self.session.state() == ConnectionState::AwaitingConnect
            && self.pending_connect.is_none();

        match error {
            DecodeError::UnsupportedProtocolVersion(level) if awaiting_connect => {
                debug!("Unsupported protocol level {}", level);
                self.refuse(ConnectReturnCode::UnacceptableProtocolVersion);
            }
            error => {
                debug!("Decode error from {}: {}", self.session.client_id, error);
                self.close_with(CloseReason::DecodeError(error));
            }
        }
    }
}
