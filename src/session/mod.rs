//! Per-connection session state
//!
//! A `ConnectionSession` lives exactly as long as its connection. It starts
//! out empty in `AwaitingConnect`, is filled in from the CONNECT packet and
//! owns the QoS in-flight sets and the keep-alive monitor for the connection.
//! Nothing here survives a reconnect.

use std::sync::Arc;
use std::time::Instant;

use crate::keepalive::KeepAliveMonitor;
use crate::protocol::{Connect, ProtocolVersion, Will};
use crate::qos::QosTracker;

/// Connection lifecycle
///
/// Transitions only move forward: `AwaitingConnect -> Connected -> Closing ->
/// Closed`, with `AwaitingConnect -> Closing` for refused or broken handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Transport accepted, waiting for CONNECT (or for the accept decision)
    AwaitingConnect,
    /// CONNACK(accepted) sent
    Connected,
    /// Tearing down; no more input is processed
    Closing,
    /// Terminal
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::AwaitingConnect => "awaiting-connect",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State of one client connection
#[derive(Debug)]
pub struct ConnectionSession {
    /// Client identifier (empty until CONNECT)
    pub client_id: Arc<str>,
    pub protocol_version: ProtocolVersion,
    /// Negotiated keep-alive in seconds
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    /// Will message, published by the broker on ungraceful close
    pub will: Option<Will>,
    /// Outbound and inbound in-flight exchanges
    pub qos: QosTracker,
    state: ConnectionState,
    keep_alive_monitor: Option<KeepAliveMonitor>,
    created_at: Instant,
}

impl ConnectionSession {
    pub fn new(now: Instant) -> Self {
        Self {
            client_id: Arc::from(""),
            protocol_version: ProtocolVersion::V311,
            keep_alive: 0,
            clean_session: true,
            username: None,
            will: None,
            qos: QosTracker::new(),
            state: ConnectionState::AwaitingConnect,
            keep_alive_monitor: None,
            created_at: now,
        }
    }

    /// Copy the client's identity from CONNECT
    pub fn populate(&mut self, connect: &Connect) {
        self.client_id = Arc::from(connect.client_id.as_str());
        self.protocol_version = connect.protocol_version;
        self.keep_alive = connect.keep_alive;
        self.clean_session = connect.clean_session;
        self.username = connect.username.clone();
        self.will = connect.will.clone();
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`; returns `false` (and leaves the state alone) when that
    /// would go backwards or stand still
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if next <= self.state {
            return false;
        }
        self.state = next;
        true
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// `Closing` or `Closed`
    pub fn is_closing(&self) -> bool {
        self.state >= ConnectionState::Closing
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Start keep-alive supervision with the negotiated interval
    pub fn start_keep_alive(&mut self, now: Instant) {
        self.keep_alive_monitor = Some(KeepAliveMonitor::new(self.keep_alive, now));
    }

    pub fn keep_alive_monitor(&self) -> Option<&KeepAliveMonitor> {
        self.keep_alive_monitor.as_ref()
    }

    pub fn keep_alive_monitor_mut(&mut self) -> Option<&mut KeepAliveMonitor> {
        self.keep_alive_monitor.as_mut()
    }

    /// Record inbound activity
    pub fn touch(&mut self, now: Instant) {
        if let Some(monitor) = self.keep_alive_monitor.as_mut() {
            monitor.touch(now);
        }
    }

    /// Last inbound activity, once supervision has started
    pub fn last_activity(&self) -> Option<Instant> {
        self.keep_alive_monitor.as_ref().map(|m| m.last_activity())
    }

    /// Drop in-flight state and stop supervision
    pub fn discard(&mut self) {
        self.qos.clear();
        self.keep_alive_monitor = None;
    }
}
