//! Integration tests over real TCP sockets
//!
//! A server is bound to an ephemeral port, clients speak raw MQTT through
//! the crate's own codec and the test body plays the application.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use mqtt_endpoint::codec::{Decoder, Encoder};
use mqtt_endpoint::connection::MqttEndpoint;
use mqtt_endpoint::endpoint::{CloseReason, Event};
use mqtt_endpoint::protocol::{
    ConnAck, Connect, ConnectReturnCode, Packet, PubAck, PubComp, PubRec, PubRel, Publish, QoS,
    SubAck, SubAckReturnCode, Subscribe, Subscription, Will,
};
use mqtt_endpoint::server::{Server, ServerConfig};

const WAIT: Duration = Duration::from_secs(5);

/// Helper struct for MQTT client operations in tests
struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
    decoder: Decoder,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        Self {
            stream,
            buf: BytesMut::new(),
            decoder: Decoder::new(),
        }
    }

    async fn send(&mut self, packet: Packet) {
        let mut out = BytesMut::new();
        Encoder.encode(&packet, &mut out).expect("Failed to encode");
        self.stream.write_all(&out).await.expect("Failed to write");
    }

    /// Next packet, `None` once the server hangs up
    async fn recv(&mut self) -> Option<Packet> {
        loop {
            if let Some((packet, consumed)) = self.decoder.decode(&self.buf).expect("bad packet") {
                self.buf.advance(consumed);
                return Some(packet);
            }
            match timeout(WAIT, self.stream.read_buf(&mut self.buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return None,
                Ok(Ok(_)) => {}
                Err(_) => panic!("timed out waiting for a packet"),
            }
        }
    }
}

async fn start_server(instances: usize) -> (Arc<Server>, Vec<mpsc::Receiver<MqttEndpoint>>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        bind_addr: addr,
        instances,
        ..Default::default()
    };
    let (server, receivers) = Server::new(config);
    let server = Arc::new(server);
    let accept = server.clone();
    tokio::spawn(async move { accept.serve(listener).await });
    (server, receivers, addr)
}

async fn next_endpoint(receiver: &mut mpsc::Receiver<MqttEndpoint>) -> MqttEndpoint {
    timeout(WAIT, receiver.recv())
        .await
        .expect("no connection dispatched")
        .expect("instance channel closed")
}

async fn next_event(endpoint: &mut MqttEndpoint) -> Event {
    timeout(WAIT, endpoint.next_event())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

fn connect_packet(client_id: &str, will: Option<Will>) -> Packet {
    Packet::Connect(Box::new(Connect {
        client_id: client_id.to_string(),
        keep_alive: 60,
        will,
        ..Default::default()
    }))
}

fn accepted() -> Packet {
    Packet::ConnAck(ConnAck {
        session_present: false,
        return_code: ConnectReturnCode::Accepted,
    })
}

/// CONNECT, hand back the endpoint, accept, wait for CONNACK
async fn establish(
    addr: SocketAddr,
    receiver: &mut mpsc::Receiver<MqttEndpoint>,
    client_id: &str,
    will: Option<Will>,
) -> (TestClient, MqttEndpoint) {
    let mut client = TestClient::connect(addr).await;
    client.send(connect_packet(client_id, will)).await;
    let mut endpoint = next_endpoint(receiver).await;
    match next_event(&mut endpoint).await {
        Event::ConnectRequest(connect) => assert_eq!(connect.client_id, client_id),
        other => panic!("expected connect request, got {:?}", other),
    }
    endpoint.handle.accept(false).await.unwrap();
    assert_eq!(client.recv().await, Some(accepted()));
    (client, endpoint)
}

fn publish(topic: &str, qos: QoS, packet_id: Option<u16>, payload: &'static [u8]) -> Packet {
    Packet::Publish(Publish {
        dup: false,
        qos,
        retain: false,
        topic: topic.into(),
        packet_id,
        payload: Bytes::from_static(payload),
    })
}

#[tokio::test]
async fn test_full_session_lifecycle() {
    let (_server, mut receivers, addr) = start_server(1).await;
    let (mut client, mut endpoint) = establish(addr, &mut receivers[0], "c1", None).await;

    // Inbound QoS 1 is delivered and acknowledged
    client
        .send(publish("a/b", QoS::AtLeastOnce, Some(7), b"hi"))
        .await;
    match next_event(&mut endpoint).await {
        Event::PublishReceived(p) => {
            assert_eq!(&*p.topic, "a/b");
            assert_eq!(p.packet_id, Some(7));
            assert_eq!(p.payload, Bytes::from_static(b"hi"));
        }
        other => panic!("expected publish, got {:?}", other),
    }
    assert_eq!(client.recv().await, Some(Packet::PubAck(PubAck::new(7))));

    // Outbound QoS 2 runs the full four-packet exchange
    let id = endpoint
        .handle
        .publish("x/y", Bytes::from_static(b"data"), QoS::ExactlyOnce, false, false)
        .await
        .unwrap();
    assert_eq!(id, Some(1));
    assert_eq!(
        client.recv().await,
        Some(publish("x/y", QoS::ExactlyOnce, Some(1), b"data"))
    );

    client.send(Packet::PubRec(PubRec::new(1))).await;
    assert_eq!(
        next_event(&mut endpoint).await,
        Event::PublishReceivedAck { packet_id: 1 }
    );
    assert_eq!(client.recv().await, Some(Packet::PubRel(PubRel::new(1))));

    client.send(Packet::PubComp(PubComp::new(1))).await;
    assert_eq!(
        next_event(&mut endpoint).await,
        Event::PublishCompleted { packet_id: 1 }
    );

    client.send(Packet::Disconnect).await;
    assert_eq!(
        next_event(&mut endpoint).await,
        Event::Closed {
            reason: CloseReason::Graceful,
            will: None,
        }
    );
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn test_duplicate_qos2_delivered_once() {
    let (_server, mut receivers, addr) = start_server(1).await;
    let (mut client, mut endpoint) = establish(addr, &mut receivers[0], "dedup", None).await;

    let first = publish("t", QoS::ExactlyOnce, Some(42), b"once");
    client.send(first.clone()).await;
    assert_eq!(client.recv().await, Some(Packet::PubRec(PubRec::new(42))));

    client.send(first).await;
    assert_eq!(client.recv().await, Some(Packet::PubRec(PubRec::new(42))));

    client.send(Packet::PubRel(PubRel::new(42))).await;
    assert_eq!(client.recv().await, Some(Packet::PubComp(PubComp::new(42))));

    assert!(matches!(
        next_event(&mut endpoint).await,
        Event::PublishReceived(_)
    ));
    // Second copy produced no event; the release comes straight after
    assert_eq!(
        next_event(&mut endpoint).await,
        Event::PublishReleased { packet_id: 42 }
    );
}

#[tokio::test]
async fn test_connections_spread_round_robin() {
    let (server, mut receivers, addr) = start_server(2).await;
    assert_eq!(server.instances(), 2);

    let mut first = TestClient::connect(addr).await;
    first.send(connect_packet("first", None)).await;
    let mut endpoint = next_endpoint(&mut receivers[0]).await;
    assert!(matches!(
        next_event(&mut endpoint).await,
        Event::ConnectRequest(_)
    ));

    let mut second = TestClient::connect(addr).await;
    second.send(connect_packet("second", None)).await;
    let mut endpoint = next_endpoint(&mut receivers[1]).await;
    match next_event(&mut endpoint).await {
        Event::ConnectRequest(connect) => assert_eq!(connect.client_id, "second"),
        other => panic!("expected connect request, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_client_is_disconnected() {
    let (_server, mut receivers, addr) = start_server(1).await;

    let mut client = TestClient::connect(addr).await;
    client.send(connect_packet("banned", None)).await;
    let mut endpoint = next_endpoint(&mut receivers[0]).await;
    assert!(matches!(
        next_event(&mut endpoint).await,
        Event::ConnectRequest(_)
    ));

    endpoint
        .handle
        .reject(ConnectReturnCode::NotAuthorized)
        .await
        .unwrap();
    assert_eq!(
        client.recv().await,
        Some(Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        }))
    );
    assert_eq!(client.recv().await, None);
    assert_eq!(
        next_event(&mut endpoint).await,
        Event::Closed {
            reason: CloseReason::Rejected(ConnectReturnCode::NotAuthorized),
            will: None,
        }
    );
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let (server, mut receivers, addr) = start_server(1).await;
    let will = Will {
        topic: "status/c1".to_string(),
        payload: Bytes::from_static(b"gone"),
        qos: QoS::AtMostOnce,
        retain: false,
    };
    let (mut client, mut endpoint) =
        establish(addr, &mut receivers[0], "c1", Some(will.clone())).await;

    server.shutdown();

    assert_eq!(
        next_event(&mut endpoint).await,
        Event::Closed {
            reason: CloseReason::ApplicationClosed,
            will: Some(will),
        }
    );
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn test_subscriptions_granted_at_requested_qos() {
    let (_server, mut receivers, addr) = start_server(1).await;
    let (mut client, mut endpoint) = establish(addr, &mut receivers[0], "sub", None).await;

    client
        .send(Packet::Subscribe(Subscribe {
            packet_id: 3,
            subscriptions: vec![
                Subscription::new("a/+", QoS::ExactlyOnce),
                Subscription::new("b/#", QoS::AtMostOnce),
            ],
        }))
        .await;
    let (packet_id, subscriptions) = match next_event(&mut endpoint).await {
        Event::SubscribeRequest {
            packet_id,
            subscriptions,
        } => (packet_id, subscriptions),
        other => panic!("expected subscribe request, got {:?}", other),
    };

    // Codes straight from an iterator over the request
    endpoint
        .handle
        .subscribe_acknowledge(
            packet_id,
            subscriptions.iter().map(|sub| SubAckReturnCode::from(sub.qos)),
        )
        .await
        .unwrap();
    assert_eq!(
        client.recv().await,
        Some(Packet::SubAck(SubAck {
            packet_id: 3,
            return_codes: [SubAckReturnCode::GrantedQoS2, SubAckReturnCode::GrantedQoS0]
                .into_iter()
                .collect(),
        }))
    );
}
