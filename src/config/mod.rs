//! Configuration Module
//!
//! TOML configuration for the server with support for:
//! - Logging level
//! - Listener addresses, TLS and instance count
//! - Endpoint timeouts and acknowledgment mode
//! - Environment variable substitution (`${VAR}`, `${VAR:-default}`)
//! - Environment variable overrides (MQTT_ENDPOINT__* prefix)

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::codec::{DEFAULT_MAX_PACKET_SIZE, MAX_REMAINING_LENGTH};
use crate::connection::ConnectionConfig;
use crate::endpoint::EndpointConfig;
use crate::server::{self, TlsConfig};


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let substituted = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    });
    Ok(substituted.into_owned())
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Listener configuration
    pub server: ServerSection,
    /// Per-connection protocol settings
    pub endpoint: EndpointSection,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// TCP bind address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// TLS bind address (optional, enables MQTT over TLS, usually port 8883)
    pub tls_bind: Option<SocketAddr>,
    /// TLS configuration (required when tls_bind is set)
    pub tls: Option<ServerTlsConfig>,
    /// Number of instances new connections are distributed over
    #[serde(default = "default_instances")]
    pub instances: usize,
}

/// TLS configuration for the server
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerTlsConfig {
    /// Path to certificate file (PEM format)
    pub cert: String,
    /// Path to private key file (PEM format)
    pub key: String,
    /// Path to CA certificate file for client authentication (PEM format, optional)
    pub ca_cert: Option<String>,
    /// Require client certificate authentication
    #[serde(default)]
    pub require_client_cert: bool,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1883))
}

fn default_instances() -> usize {
    1
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tls_bind: None,
            tls: None,
            instances: default_instances(),
        }
    }
}

/// Per-connection protocol settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointSection {
    /// Time allowed for CONNECT after the transport opens ("0s" = no limit)
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Time the application has to accept or reject a CONNECT ("0s" = no
    /// limit). Expiry refuses the client with "server unavailable".
    #[serde(default = "default_accept_timeout", with = "humantime_serde")]
    pub accept_timeout: Duration,
    /// Acknowledge publishes without waiting for the application
    #[serde(default = "default_true")]
    pub auto_ack: bool,
    /// Maximum packet size in bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Events buffered towards the application per connection
    #[serde(default = "default_capacity")]
    pub event_capacity: usize,
    /// Application actions buffered per connection
    #[serde(default = "default_capacity")]
    pub command_capacity: usize,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_accept_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

fn default_capacity() -> usize {
    64
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            accept_timeout: default_accept_timeout(),
            auto_ack: true,
            max_packet_size: default_max_packet_size(),
            event_capacity: default_capacity(),
            command_capacity: default_capacity(),
        }
    }
}

/// Zero means "no limit"
fn optional_timeout(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MQTT_ENDPOINT__` prefix with double underscores for nesting:
    ///    - `MQTT_ENDPOINT__SERVER__BIND=0.0.0.0:1884` overrides `server.bind`
    ///    - `MQTT_ENDPOINT__ENDPOINT__AUTO_ACK=false` overrides `endpoint.auto_ack`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("server.bind", "0.0.0.0:1883")?
            .set_default("server.instances", 1)?
            .set_default("endpoint.connect_timeout", "30s")?
            .set_default("endpoint.accept_timeout", "30s")?
            .set_default("endpoint.auto_ack", true)?
            .set_default("endpoint.max_packet_size", DEFAULT_MAX_PACKET_SIZE as u64)?
            .set_default("endpoint.event_capacity", 64)?
            .set_default("endpoint.command_capacity", 64)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("MQTT_ENDPOINT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.instances == 0 {
            return Err(ConfigError::Validation(
                "server.instances must be at least 1".to_string(),
            ));
        }

        let endpoint = &self.endpoint;
        if endpoint.max_packet_size == 0 || endpoint.max_packet_size > MAX_REMAINING_LENGTH {
            return Err(ConfigError::Validation(format!(
                "endpoint.max_packet_size must be between 1 and {}",
                MAX_REMAINING_LENGTH
            )));
        }
        if endpoint.event_capacity == 0 || endpoint.command_capacity == 0 {
            return Err(ConfigError::Validation(
                "endpoint channel capacities must be at least 1".to_string(),
            ));
        }

        if self.server.tls_bind.is_some() {
            match &self.server.tls {
                Some(tls) => {
                    if tls.cert.is_empty() {
                        return Err(ConfigError::Validation(
                            "tls.cert is required when tls_bind is set".to_string(),
                        ));
                    }
                    if tls.key.is_empty() {
                        return Err(ConfigError::Validation(
                            "tls.key is required when tls_bind is set".to_string(),
                        ));
                    }
                }
                None => {
                    return Err(ConfigError::Validation(
                        "tls configuration is required when tls_bind is set".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Settings for each connection's endpoint
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            connect_timeout: optional_timeout(self.endpoint.connect_timeout),
            accept_timeout: optional_timeout(self.endpoint.accept_timeout),
            auto_ack: self.endpoint.auto_ack,
        }
    }

    /// Settings for the acceptor and its connection tasks
    pub fn server_config(&self) -> server::ServerConfig {
        server::ServerConfig {
            bind_addr: self.server.bind,
            tls_bind_addr: self.server.tls_bind,
            tls: self.server.tls.as_ref().map(|tls| TlsConfig {
                cert_path: tls.cert.clone(),
                key_path: tls.key.clone(),
                ca_cert_path: tls.ca_cert.clone(),
                require_client_cert: tls.require_client_cert,
            }),
            instances: self.server.instances,
            connection: ConnectionConfig {
                endpoint: self.endpoint_config(),
                max_packet_size: self.endpoint.max_packet_size,
                event_capacity: self.endpoint.event_capacity,
                command_capacity: self.endpoint.command_capacity,
            },
        }
    }
}
