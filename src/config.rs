//! # Configuration Management
//!
//! Centralized configuration for a peer node.
//!
//! A node needs only a bind host and port; everything else has a default that
//! matches the classic wire behaviour (delimiter framing, no handshake or
//! write deadline, 10 second poll interval).
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults or `NodeConfig::new(host, port)`
//! - Environment overrides via `from_env()`
//!
//! ## Hardening
//! `handshake_timeout` and `write_timeout` are `None` by default. Both unset
//! means a silent peer can stall a handshake or a send indefinitely; set them
//! when peers are not trusted.

use crate::core::codec::WireMode;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout::{DEFAULT_HANDSHAKE_READ_CAP, DEFAULT_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Frame delimiter byte (ASCII end-of-transmission)
pub const FRAME_DELIMITER: u8 = 0x04;

/// Max allowed buffered frame size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration structure for a node
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NodeConfig {
    /// Identity, addressing and timing
    #[serde(default)]
    pub node: NodeSettings,

    /// Wire format
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Default configuration bound to `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::default_with_overrides(|config| {
            config.node.host = host.into();
            config.node.port = port;
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("PEERLINK_HOST") {
            config.node.host = host;
        }

        if let Ok(port) = std::env::var("PEERLINK_PORT") {
            config.node.port = port
                .parse::<u16>()
                .map_err(|e| ProtocolError::ConfigError(format!("Invalid PEERLINK_PORT: {e}")))?;
        }

        if let Ok(id) = std::env::var("PEERLINK_NODE_ID") {
            config.node.id = Some(id);
        }

        if let Ok(poll) = std::env::var("PEERLINK_POLL_INTERVAL_MS") {
            if let Ok(val) = poll.parse::<u64>() {
                config.node.poll_interval = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("PEERLINK_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.node.handshake_timeout = Some(Duration::from_millis(val));
            }
        }

        if let Ok(timeout) = std::env::var("PEERLINK_WRITE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.node.write_timeout = Some(Duration::from_millis(val));
            }
        }

        if let Ok(mode) = std::env::var("PEERLINK_WIRE_MODE") {
            config.transport.wire_mode = match mode.as_str() {
                "delimited" => WireMode::Delimited,
                "length_prefixed" => WireMode::LengthPrefixed,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Invalid PEERLINK_WIRE_MODE: '{other}' (expected 'delimited' or 'length_prefixed')"
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.node.validate());
        errors.extend(self.transport.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Identity, addressing and timing for one node
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Bind host (e.g., "127.0.0.1")
    pub host: String,

    /// Bind port; 0 lets the OS choose
    pub port: u16,

    /// Fixed node id; a random one is generated when unset
    #[serde(default)]
    pub id: Option<String>,

    /// Bounded wait for accept and read before re-checking the termination flag
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Largest peer id accepted in the single handshake read
    pub max_handshake_len: usize,

    /// Deadline for the id exchange; `None` waits forever
    #[serde(default, with = "opt_duration_serde")]
    pub handshake_timeout: Option<Duration>,

    /// Deadline for a single frame write; `None` waits forever
    #[serde(default, with = "opt_duration_serde")]
    pub write_timeout: Option<Duration>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 9001,
            id: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_handshake_len: DEFAULT_HANDSHAKE_READ_CAP,
            handshake_timeout: None,
            write_timeout: None,
        }
    }
}

impl NodeSettings {
    /// `host:port` string used for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate node settings
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Bind host cannot be empty".to_string());
        }

        if let Some(ref id) = self.id {
            if id.is_empty() {
                errors.push("Node id cannot be empty".to_string());
            } else if id.len() > self.max_handshake_len {
                errors.push(format!(
                    "Node id too long: {} bytes (handshake cap: {})",
                    id.len(),
                    self.max_handshake_len
                ));
            }
        }

        if self.poll_interval.as_millis() < 10 {
            errors.push("Poll interval too short (minimum: 10ms)".to_string());
        } else if self.poll_interval.as_secs() > 300 {
            errors.push("Poll interval too long (maximum: 300s)".to_string());
        }

        if self.max_handshake_len == 0 {
            errors.push("Handshake read cap must be greater than 0".to_string());
        }

        if let Some(timeout) = self.handshake_timeout {
            if timeout.as_millis() < 10 {
                errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
            }
        }

        if let Some(timeout) = self.write_timeout {
            if timeout.as_millis() < 10 {
                errors.push("Write timeout too short (minimum: 10ms)".to_string());
            }
        }

        errors
    }
}

/// Wire format configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Framing scheme; both peers must agree
    pub wire_mode: WireMode,

    /// Maximum frame body size in bytes
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            wire_mode: WireMode::Delimited,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: {} bytes)",
                self.max_frame_size,
                u32::MAX
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether to include thread ids in log lines
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_format: false,
            thread_ids: false,
        }
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Optional durations in milliseconds; absent means "no deadline"
mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
