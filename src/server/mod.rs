//! Connection acceptor
//!
//! Listens on a plain TCP address and optionally a TLS address, wraps each
//! accepted stream in its own connection task and hands the application
//! side (`MqttEndpoint`) to one of N instances in round-robin order. Each
//! instance is just a channel the application reads new connections from.

mod tls;

pub use tls::{load_tls_config, TlsError};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionConfig, MqttEndpoint};

/// New connections queued per instance before the acceptor waits
const INSTANCE_BACKLOG: usize = 128;

/// TLS listener settings
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Server certificate chain (PEM)
    pub cert_path: String,
    /// Server private key (PEM)
    pub key_path: String,
    /// CA bundle for verifying client certificates
    pub ca_cert_path: Option<String>,
    /// Refuse clients without a valid certificate
    pub require_client_cert: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address
    pub bind_addr: SocketAddr,
    /// TLS bind address (needs `tls`)
    pub tls_bind_addr: Option<SocketAddr>,
    pub tls: Option<TlsConfig>,
    /// Number of instances connections are spread over
    pub instances: usize,
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1883)),
            tls_bind_addr: None,
            tls: None,
            instances: 1,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Hands new connections to instances in turn
#[derive(Clone)]
struct Dispatcher {
    instances: Arc<[mpsc::Sender<MqttEndpoint>]>,
    next: Arc<AtomicUsize>,
    connection: ConnectionConfig,
    shutdown: broadcast::Sender<()>,
}

impl Dispatcher {
    /// Spawn the connection task and give its endpoint to the next instance
    fn dispatch<S>(&self, stream: S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (connection, endpoint) = Connection::new(stream, addr, &self.connection);
        let connection = connection.with_shutdown(self.shutdown.subscribe());

        tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                debug!("Connection error from {}: {}", addr, e);
            }
        });

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        let instance = self.instances[index].clone();
        tokio::spawn(async move {
            if instance.send(endpoint).await.is_err() {
                // The connection refuses the client once its accept decision times out
                warn!("Instance {} is gone, dropping connection from {}", index, addr);
            }
        });
    }
}

/// The MQTT server
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
    shutdown: broadcast::Sender<()>,
}

impl Server {
    /// Create the server and one receiver of new connections per instance
    pub fn new(config: ServerConfig) -> (Self, Vec<mpsc::Receiver<MqttEndpoint>>) {
        let instances = config.instances.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..instances)
            .map(|_| mpsc::channel(INSTANCE_BACKLOG))
            .unzip();
        let (shutdown, _) = broadcast::channel(1);

        let dispatcher = Dispatcher {
            instances: senders.into(),
            next: Arc::new(AtomicUsize::new(0)),
            connection: config.connection.clone(),
            shutdown: shutdown.clone(),
        };

        let server = Self {
            config,
            dispatcher,
            shutdown,
        };
        (server, receivers)
    }

    /// Bind the configured addresses and accept until shutdown
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("MQTT/TCP listening on {}", listener.local_addr()?);

        if let (Some(tls_addr), Some(tls_config)) = (self.config.tls_bind_addr, &self.config.tls) {
            let acceptor = load_tls_config(tls_config)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let tls_listener = TcpListener::bind(tls_addr).await?;
            info!("MQTT/TLS listening on {}", tls_listener.local_addr()?);

            let dispatcher = self.dispatcher.clone();
            let shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(accept_tls(tls_listener, acceptor, dispatcher, shutdown_rx));
        } else if self.config.tls_bind_addr.is_some() {
            warn!("tls_bind is set without a [server.tls] section, TLS listener disabled");
        }

        self.serve(listener).await
    }

    /// Accept plain TCP connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        let mut shutdown_rx = self.shutdown.subscribe();

        debug!("Starting TCP accept loop");
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!("New TCP connection from {}", addr);
                        let _ = stream.set_nodelay(true);
                        self.dispatcher.dispatch(stream, addr);
                    }
                    Err(e) => {
                        error!("Failed to accept TCP connection: {}", e);
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("TCP listener shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Stop accepting and close every live connection
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn instances(&self) -> usize {
        self.dispatcher.instances.len()
    }
}

async fn accept_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    dispatcher: Dispatcher,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    debug!("New TLS connection from {}", addr);
                    let _ = stream.set_nodelay(true);
                    let acceptor = acceptor.clone();
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => dispatcher.dispatch(tls_stream, addr),
                            Err(e) => debug!("TLS handshake failed for {}: {}", addr, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept TLS connection: {}", e);
                }
            },
            _ = shutdown_rx.recv() => {
                info!("TLS listener shutting down");
                return;
            }
        }
    }
}
