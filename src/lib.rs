//! mqtt-endpoint - Server-side MQTT v3.1.1 connection engine
//!
//! Drives a single client connection from CONNECT to close: handshake
//! negotiation, keep-alive supervision and the QoS 1/2 acknowledgment
//! exchanges. Routing, retained messages and persistence are left to the
//! application, which talks to each connection through events and actions.
//!
//! - [`endpoint::Endpoint`]: the I/O-free state machine
//! - [`connection::Connection`]: drives an endpoint over an async byte stream
//! - [`server::Server`]: accepts TCP/TLS clients and spreads them over instances

pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod keepalive;
pub mod protocol;
pub mod qos;
pub mod server;
pub mod session;

pub use config::Config;
pub use connection::{Connection, EndpointHandle, MqttEndpoint};
pub use endpoint::{CloseReason, Endpoint, EndpointConfig, EndpointError, Event};
pub use keepalive::{Clock, ManualClock, SystemClock};
pub use protocol::{ProtocolVersion, QoS};
pub use server::{Server, ServerConfig};
