//! mqtt-endpoint - MQTT v3.1.1 connection engine demo server
//!
//! Usage:
//!   mqtt-endpoint [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -b, --bind <ADDR>      Bind address (default: 0.0.0.0:1883)
//!   --tls-bind <ADDR>      TLS bind address (needs [server.tls] in the config)
//!   -i, --instances <N>    Number of instances connections are spread over
//!   --manual-ack           Acknowledge publishes from the application
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help
//!
//! Every connection is accepted, every subscription is granted at the
//! requested QoS and everything else is logged.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mqtt_endpoint::config::Config;
use mqtt_endpoint::connection::{EndpointHandle, MqttEndpoint};
use mqtt_endpoint::endpoint::{EndpointError, Event};
use mqtt_endpoint::protocol::{QoS, SubAckReturnCode};
use mqtt_endpoint::server::Server;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }
}

/// mqtt-endpoint - server-side MQTT v3.1.1 connection engine
#[derive(Parser, Debug)]
#[command(name = "mqtt-endpoint")]
#[command(version)]
#[command(about = "Server-side MQTT v3.1.1 connection engine")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// TLS bind address
    #[arg(long)]
    tls_bind: Option<SocketAddr>,

    /// Number of instances connections are distributed over
    #[arg(short, long)]
    instances: Option<usize>,

    /// Leave publish acknowledgments to the application
    #[arg(long)]
    manual_ack: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Without --config the environment can still override the defaults
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let file_config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides default (warn)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&file_config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    let mut server_config = file_config.server_config();
    if let Some(bind) = args.bind {
        server_config.bind_addr = bind;
    }
    if let Some(tls_bind) = args.tls_bind {
        server_config.tls_bind_addr = Some(tls_bind);
    }
    if let Some(instances) = args.instances {
        server_config.instances = instances.max(1);
    }
    if args.manual_ack {
        server_config.connection.endpoint.auto_ack = false;
    }

    info!("Starting mqtt-endpoint");
    info!("  Bind address: {}", server_config.bind_addr);
    if let Some(tls_addr) = &server_config.tls_bind_addr {
        info!("  TLS address: {}", tls_addr);
    }
    info!("  Instances: {}", server_config.instances);
    info!(
        "  Max packet size: {} bytes",
        server_config.connection.max_packet_size
    );
    let endpoint = &server_config.connection.endpoint;
    info!("  Connect timeout: {:?}", endpoint.connect_timeout);
    info!("  Accept timeout: {:?}", endpoint.accept_timeout);
    info!("  Auto ack: {}", endpoint.auto_ack);

    let manual_ack = !endpoint.auto_ack;
    let (server, receivers) = Server::new(server_config);
    for (index, receiver) in receivers.into_iter().enumerate() {
        tokio::spawn(run_instance(index, receiver, manual_ack));
    }

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}

/// Serve every connection handed to this instance
async fn run_instance(
    index: usize,
    mut receiver: mpsc::Receiver<MqttEndpoint>,
    manual_ack: bool,
) {
    while let Some(endpoint) = receiver.recv().await {
        debug!("Instance {} took connection from {}", index, endpoint.peer_addr);
        tokio::spawn(drive(endpoint, manual_ack));
    }
}

async fn drive(mut endpoint: MqttEndpoint, manual_ack: bool) {
    let peer = endpoint.peer_addr;
    while let Some(event) = endpoint.next_event().await {
        if let Err(e) = respond(&endpoint.handle, event, peer, manual_ack).await {
            // Closed races are expected; anything else is worth a warning
            if !matches!(e, EndpointError::Closed) {
                warn!("{}: action failed: {}", peer, e);
            }
        }
    }
}

async fn respond(
    handle: &EndpointHandle,
    event: Event,
    peer: SocketAddr,
    manual_ack: bool,
) -> Result<(), EndpointError> {
    match event {
        Event::ConnectRequest(connect) => {
            info!(
                "{}: CONNECT client_id={:?} keep_alive={}s clean_session={}",
                peer, connect.client_id, connect.keep_alive, connect.clean_session
            );
            handle.accept(false).await
        }
        Event::PublishReceived(publish) => {
            info!(
                "{}: PUBLISH {} ({} bytes, {:?})",
                peer,
                publish.topic,
                publish.payload.len(),
                publish.qos
            );
            match (manual_ack, publish.qos, publish.packet_id) {
                (true, QoS::AtLeastOnce, Some(id)) => handle.publish_acknowledge(id).await,
                (true, QoS::ExactlyOnce, Some(id)) => handle.publish_received(id).await,
                _ => Ok(()),
            }
        }
        Event::PublishReleased { packet_id } if manual_ack => {
            handle.publish_complete(packet_id).await
        }
        Event::PublishReceivedAck { packet_id } if manual_ack => {
            handle.publish_release(packet_id).await
        }
        Event::PublishReleased { packet_id } | Event::PublishReceivedAck { packet_id } => {
            debug!("{}: handshake step for {}", peer, packet_id);
            Ok(())
        }
        Event::PublishAcknowledged { packet_id } | Event::PublishCompleted { packet_id } => {
            debug!("{}: delivery {} complete", peer, packet_id);
            Ok(())
        }
        Event::SubscribeRequest {
            packet_id,
            subscriptions,
        } => {
            for sub in &subscriptions {
                info!("{}: SUBSCRIBE {} ({:?})", peer, sub.filter, sub.qos);
            }
            let codes = subscriptions
                .iter()
                .map(|sub| SubAckReturnCode::from(sub.qos));
            handle.subscribe_acknowledge(packet_id, codes).await
        }
        Event::UnsubscribeRequest { packet_id, filters } => {
            info!("{}: UNSUBSCRIBE {}", peer, filters.join(", "));
            handle.unsubscribe_acknowledge(packet_id).await
        }
        Event::Ping => {
            debug!("{}: PINGREQ", peer);
            Ok(())
        }
        Event::Closed { reason, will } => {
            info!("{}: closed ({})", peer, reason);
            if let Some(will) = will {
                info!("{}: will due on {} ({:?})", peer, will.topic, will.qos);
            }
            Ok(())
        }
    }
}
