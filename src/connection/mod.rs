//! Per-connection task
//!
//! Owns the socket and one `Endpoint`. Socket reads, application commands,
//! endpoint deadlines and server shutdown are multiplexed with `select!` and
//! handled one at a time, so the endpoint sees a single ordered stream of
//! inputs. After each input the task writes whatever the endpoint queued and
//! forwards its events to the application.
//!
//! The task never waits on the event channel. Events the application has not
//! made room for are kept in a local backlog and delivered from the `select!`
//! loop, so commands, deadlines and shutdown keep being served while the
//! application is slow. Socket reads pause while the backlog is full.

mod handle;


use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, trace};

pub use handle::{EndpointHandle, MqttEndpoint};

use crate::codec::{Decoder, Encoder};
use crate::endpoint::{Endpoint, EndpointConfig, Event};
use crate::protocol::EncodeError;
use handle::Command;

/// Connection error types
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Encode(EncodeError),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "IO error: {}", e),
            ConnectionError::Encode(e) => write!(f, "Encode error: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<EncodeError> for ConnectionError {
    fn from(e: EncodeError) -> Self {
        ConnectionError::Encode(e)
    }
}

/// Settings for one connection task
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: EndpointConfig,
    /// Largest packet accepted from the client
    pub max_packet_size: usize,
    /// Events buffered towards the application
    pub event_capacity: usize,
    /// Actions buffered towards the connection
    pub command_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            max_packet_size: crate::codec::DEFAULT_MAX_PACKET_SIZE,
            event_capacity: 64,
            command_capacity: 64,
        }
    }
}

/// Connection handler - generic over the stream type
pub struct Connection<S> {
    stream: S,
    addr: SocketAddr,
    endpoint: Endpoint,
    decoder: Decoder,
    encoder: Encoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    commands: mpsc::Receiver<Command>,
    /// Cleared once every `EndpointHandle` is dropped
    commands_open: bool,
    events: mpsc::Sender<Event>,
    /// Cleared once the application drops its event receiver
    events_open: bool,
    /// Events not yet accepted by the event channel
    backlog: VecDeque<Event>,
    event_capacity: usize,
    /// Set once the stream has been shut down
    stream_closed: bool,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream; the returned `MqttEndpoint` is the
    /// application's side of it
    pub fn new(stream: S, addr: SocketAddr, config: &ConnectionConfig) -> (Self, MqttEndpoint) {
        let (command_tx, commands) = mpsc::channel(config.command_capacity.max(1));
        let event_capacity = config.event_capacity.max(1);
        let (events, event_rx) = mpsc::channel(event_capacity);

        let connection = Self {
            stream,
            addr,
            endpoint: Endpoint::new(config.endpoint.clone()),
            decoder: Decoder::new().with_max_packet_size(config.max_packet_size),
            encoder: Encoder::default(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            commands,
            commands_open: true,
            events,
            events_open: true,
            backlog: VecDeque::new(),
            event_capacity,
            stream_closed: false,
            shutdown: None,
        };
        let endpoint = MqttEndpoint {
            handle: EndpointHandle::new(command_tx),
            events: event_rx,
            peer_addr: addr,
        };

        (connection, endpoint)
    }

    /// Close the connection when the server shuts down
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run until the endpoint closes and every event has been handed over
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!("Connection task started for {}", self.addr);

        let mut failure = None;
        loop {
            if let Err(e) = self.flush().await {
                failure.get_or_insert(e);
            }
            if self.endpoint.is_closed() {
                if !self.stream_closed {
                    self.stream_closed = true;
                    let _ = self.stream.shutdown().await;
                }
                if self.backlog.is_empty() {
                    break;
                }
            }

            let deadline = self.endpoint.poll_timeout().map(Instant::from_std);
            let sleep_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86400));
            // Stop reading while the application decides on CONNECT or
            // while it is behind on events
            let reading = !self.endpoint.is_closed()
                && !self.endpoint.is_awaiting_decision()
                && self.backlog.len() < self.event_capacity;
            let delivering = !self.backlog.is_empty();
            let events = self.events.clone();

            tokio::select! {
                // Read from socket
                result = self.stream.read_buf(&mut self.read_buf), if reading => {
                    match result {
                        Ok(0) => {
                            debug!("Connection closed from {}", self.addr);
                            self.endpoint.handle_transport_closed();
                        }
                        Ok(_) => self.process_read_buf(),
                        Err(e) => {
                            debug!("Read error from {}: {}", self.addr, e);
                            self.endpoint.handle_transport_closed();
                        }
                    }
                }

                // Room in the event channel for the oldest backlogged event
                permit = events.reserve(), if delivering => {
                    match permit {
                        Ok(permit) => {
                            if let Some(event) = self.backlog.pop_front() {
                                permit.send(event);
                            }
                        }
                        Err(_) => {
                            trace!("Event receiver dropped for {}", self.addr);
                            self.events_open = false;
                            self.backlog.clear();
                        }
                    }
                    // Room again for packets held back in the read buffer
                    self.process_read_buf();
                }

                // Application actions
                command = self.commands.recv(), if self.commands_open => {
                    match command {
                        Some(command) => {
                            self.apply(command);
                            // Accepting may unblock bytes already buffered
                            self.process_read_buf();
                        }
                        None => {
                            trace!("All handles dropped for {}", self.addr);
                            self.commands_open = false;
                        }
                    }
                }

                // Endpoint deadlines (CONNECT, accept decision, keep-alive)
                _ = tokio::time::sleep_until(sleep_at), if deadline.is_some() => {
                    self.endpoint.handle_timeout();
                }

                // Server shutdown
                _ = recv_shutdown(&mut self.shutdown) => {
                    debug!("Shutdown, closing {}", self.addr);
                    self.shutdown = None;
                    self.endpoint.close();
                }
            }
        }

        debug!("Connection task finished for {}", self.addr);
        failure.map_or(Ok(()), Err)
    }

    /// Decode and dispatch complete packets from the read buffer
    ///
    /// Stops early once the event backlog is full; the rest stays buffered
    /// until the application catches up.
    fn process_read_buf(&mut self) {
        while !self.endpoint.is_closed()
            && !self.endpoint.is_awaiting_decision()
            && self.backlog.len() < self.event_capacity
        {
            match self.decoder.decode(&self.read_buf) {
                Ok(Some((packet, consumed))) => {
                    self.read_buf.advance(consumed);
                    self.endpoint.handle_packet(packet);
                    self.collect_events();
                }
                Ok(None) => break,
                Err(e) => {
                    self.endpoint.handle_decode_error(e);
                    break;
                }
            }
        }
    }

    /// Apply one application action to the endpoint
    fn apply(&mut self, command: Command) {
        let endpoint = &mut self.endpoint;
        match command {
            Command::Accept {
                session_present,
                reply,
            } => {
                let _ = reply.send(endpoint.accept(session_present));
            }
            Command::Reject { code, reply } => {
                let _ = reply.send(endpoint.reject(code));
            }
            Command::Publish {
                topic,
                payload,
                qos,
                dup,
                retain,
                reply,
            } => {
                let _ = reply.send(endpoint.publish(topic, payload, qos, dup, retain));
            }
            Command::Retransmit { packet_id, reply } => {
                let _ = reply.send(endpoint.retransmit(packet_id));
            }
            Command::SubscribeAcknowledge {
                packet_id,
                return_codes,
                reply,
            } => {
                let _ = reply.send(endpoint.subscribe_acknowledge(packet_id, return_codes));
            }
            Command::UnsubscribeAcknowledge { packet_id, reply } => {
                let _ = reply.send(endpoint.unsubscribe_acknowledge(packet_id));
            }
            Command::PublishAcknowledge { packet_id, reply } => {
                let _ = reply.send(endpoint.publish_acknowledge(packet_id));
            }
            Command::PublishReceived { packet_id, reply } => {
                let _ = reply.send(endpoint.publish_received(packet_id));
            }
            Command::PublishRelease { packet_id, reply } => {
                let _ = reply.send(endpoint.publish_release(packet_id));
            }
            Command::PublishComplete { packet_id, reply } => {
                let _ = reply.send(endpoint.publish_complete(packet_id));
            }
            Command::Close => endpoint.close(),
        }
    }

    /// Write queued packets, then hand queued events to the application
    ///
    /// Encode and write failures close the endpoint; the close event is still
    /// delivered before the error is returned.
    async fn flush(&mut self) -> Result<(), ConnectionError> {
        let mut failure = None;

        self.write_buf.clear();
        while let Some(packet) = self.endpoint.poll_transmit() {
            let start = self.write_buf.len();
            if let Err(e) = self.encoder.encode(&packet, &mut self.write_buf) {
                error!("Failed to encode {} for {}: {}", packet.packet_type(), self.addr, e);
                self.write_buf.truncate(start);
                self.endpoint.close();
                failure.get_or_insert(ConnectionError::Encode(e));
            }
        }

        if !self.write_buf.is_empty() {
            let written = match self.stream.write_all(&self.write_buf).await {
                Ok(()) => self.stream.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                debug!("Write error to {}: {}", self.addr, e);
                self.endpoint.handle_transport_closed();
                failure.get_or_insert(ConnectionError::Io(e));
            }
        }

        self.deliver_events();
        failure.map_or(Ok(()), Err)
    }

    fn collect_events(&mut self) {
        while let Some(event) = self.endpoint.poll_event() {
            if self.events_open {
                self.backlog.push_back(event);
            }
        }
    }

    /// Move endpoint events into the backlog and push as many as fit into
    /// the event channel without waiting
    fn deliver_events(&mut self) {
        self.collect_events();
        while let Some(event) = self.backlog.pop_front() {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.backlog.push_front(event);
                    trace!("{} events backlogged for {}", self.backlog.len(), self.addr);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!("Event receiver dropped for {}", self.addr);
                    self.events_open = false;
                    self.backlog.clear();
                }
            }
        }
    }
}

async fn recv_shutdown(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}
