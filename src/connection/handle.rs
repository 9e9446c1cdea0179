//! Application side of a connection
//!
//! Actions travel to the connection task as `Command`s and are applied in
//! arrival order, interleaved with socket input and timers. Each action waits
//! for the endpoint's answer on a oneshot channel.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::endpoint::{EndpointError, Event};
use crate::protocol::{ConnectReturnCode, QoS, SubAckReturnCode};

type Reply<T> = oneshot::Sender<Result<T, EndpointError>>;

/// Application action, applied by the connection task
#[derive(Debug)]
pub(crate) enum Command {
    Accept {
        session_present: bool,
        reply: Reply<()>,
    },
    Reject {
        code: ConnectReturnCode,
        reply: Reply<()>,
    },
    Publish {
        topic: Arc<str>,
        payload: Bytes,
        qos: QoS,
        dup: bool,
        retain: bool,
        reply: Reply<Option<u16>>,
    },
    Retransmit {
        packet_id: u16,
        reply: Reply<()>,
    },
    SubscribeAcknowledge {
        packet_id: u16,
        return_codes: Vec<SubAckReturnCode>,
        reply: Reply<()>,
    },
    UnsubscribeAcknowledge {
        packet_id: u16,
        reply: Reply<()>,
    },
    PublishAcknowledge {
        packet_id: u16,
        reply: Reply<()>,
    },
    PublishReceived {
        packet_id: u16,
        reply: Reply<()>,
    },
    PublishRelease {
        packet_id: u16,
        reply: Reply<()>,
    },
    PublishComplete {
        packet_id: u16,
        reply: Reply<()>,
    },
    Close,
}

/// Cloneable handle for driving one connection
///
/// Every method fails with `EndpointError::Closed` once the connection task
/// has finished.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    tx: mpsc::Sender<Command>,
}

impl EndpointHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EndpointError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| EndpointError::Closed)?;
        rx.await.map_err(|_| EndpointError::Closed)?
    }

    /// Accept the pending CONNECT
    pub async fn accept(&self, session_present: bool) -> Result<(), EndpointError> {
        self.request(|reply| Command::Accept {
            session_present,
            reply,
        })
        .await
    }

    /// Refuse the pending CONNECT
    pub async fn reject(&self, code: ConnectReturnCode) -> Result<(), EndpointError> {
        self.request(|reply| Command::Reject { code, reply }).await
    }

    /// Send a PUBLISH; returns the packet identifier for QoS 1 and 2
    pub async fn publish(
        &self,
        topic: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
        qos: QoS,
        dup: bool,
        retain: bool,
    ) -> Result<Option<u16>, EndpointError> {
        let topic = topic.into();
        let payload = payload.into();
        self.request(|reply| Command::Publish {
            topic,
            payload,
            qos,
            dup,
            retain,
            reply,
        })
        .await
    }

    pub async fn retransmit(&self, packet_id: u16) -> Result<(), EndpointError> {
        self.request(|reply| Command::Retransmit { packet_id, reply })
            .await
    }

    /// Answer a SUBSCRIBE with one return code per requested filter
    pub async fn subscribe_acknowledge(
        &self,
        packet_id: u16,
        return_codes: impl IntoIterator<Item = SubAckReturnCode>,
    ) -> Result<(), EndpointError> {
        let return_codes: Vec<_> = return_codes.into_iter().collect();
        self.request(|reply| Command::SubscribeAcknowledge {
            packet_id,
            return_codes,
            reply,
        })
        .await
    }

    pub async fn unsubscribe_acknowledge(&self, packet_id: u16) -> Result<(), EndpointError> {
        self.request(|reply| Command::UnsubscribeAcknowledge { packet_id, reply })
            .await
    }

    pub async fn publish_acknowledge(&self, packet_id: u16) -> Result<(), EndpointError> {
        self.request(|reply| Command::PublishAcknowledge { packet_id, reply })
            .await
    }

    pub async fn publish_received(&self, packet_id: u16) -> Result<(), EndpointError> {
        self.request(|reply| Command::PublishReceived { packet_id, reply })
            .await
    }

    pub async fn publish_release(&self, packet_id: u16) -> Result<(), EndpointError> {
        self.request(|reply| Command::PublishRelease { packet_id, reply })
            .await
    }

    pub async fn publish_complete(&self, packet_id: u16) -> Result<(), EndpointError> {
        self.request(|reply| Command::PublishComplete { packet_id, reply })
            .await
    }

    /// Close the connection; a no-op if it is already closed
    pub async fn close(&self) {
        let _ = self.tx.send(Command::Close).await;
    }

    /// The connection task has finished
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A new client connection handed to the application
///
/// Events arrive in order and end with exactly one `Event::Closed`, after
/// which the channel closes.
#[derive(Debug)]
pub struct MqttEndpoint {
    pub handle: EndpointHandle,
    pub events: mpsc::Receiver<Event>,
    pub peer_addr: SocketAddr,
}

impl MqttEndpoint {
    /// Next event, or `None` after the connection task is gone
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }
}
