//! TOML-based configuration for a `urtps-peer` process.
//!
//! Example:
//!
//! ```toml
//! [network]
//! group = "224.0.0.253"
//! port = 5007
//! pass_interval_ms = 1
//!
//! [logging]
//! log_level = "debug"
//!
//! [[publish]]
//! name = "heartbeat"
//! message = "alive"
//! interval_ms = 1000
//!
//! [[subscribe]]
//! name = "heartbeat"
//! kind = "echo"
//! ```
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! peer on the default group that publishes and subscribes to nothing.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::config::{
    EngineConfig, DEFAULT_BOOTSTRAP_TIMEOUT, DEFAULT_GROUP, DEFAULT_PORT, DEFAULT_RECV_BUFFER_SIZE,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `network.group` is not an IPv4 multicast address.
    #[error("configured group {0} is not an IPv4 multicast address")]
    InvalidGroup(Ipv4Addr),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level peer configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Fixed messages this peer repeats on the bus.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publish: Vec<PublishEntry>,
    /// Topics this peer listens to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe: Vec<SubscribeEntry>,
}

/// Multicast group, port and scheduler pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Sleep between scheduler passes in milliseconds; 0 only yields.
    #[serde(default)]
    pub pass_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level filter: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// A publishing node that repeats `message` at most once per `interval_ms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishEntry {
    pub name: String,
    pub message: String,
    #[serde(default = "default_publish_interval_ms")]
    pub interval_ms: u64,
}

impl PublishEntry {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// A subscribing node and what it does with received values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeEntry {
    pub name: String,
    #[serde(default)]
    pub kind: SubscriberKind,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberKind {
    /// Log every received value.
    #[default]
    Echo,
    /// Track whether the last value was `"True"`.
    Bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_group() -> Ipv4Addr {
    DEFAULT_GROUP
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_recv_buffer_size() -> usize {
    DEFAULT_RECV_BUFFER_SIZE
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_publish_interval_ms() -> u64 {
    1000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_port(),
            recv_buffer_size: default_recv_buffer_size(),
            pass_interval_ms: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl PeerConfig {
    /// Builds the engine settings described by the `[network]` section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidGroup`] if the group is not multicast.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let net = &self.network;
        if !net.group.is_multicast() {
            return Err(ConfigError::InvalidGroup(net.group));
        }
        Ok(EngineConfig {
            group: net.group,
            port: net.port,
            recv_buffer_size: net.recv_buffer_size.max(1),
            pass_interval: Duration::from_millis(net.pass_interval_ms),
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads a [`PeerConfig`] from `path`, returning `PeerConfig::default()` if
/// the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<PeerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PeerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &PeerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
