//! Configuration system for tinylink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TINYLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tinylink/config.toml
//!   3. ~/.config/tinylink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 30431;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TinylinkConfig {
    pub network: NetworkConfig,
    pub buffering: BufferingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the listener binds to.
    pub bind_addr: String,
    pub port: u16,
    /// Accepts beyond this many live connections are refused.
    pub max_connections: usize,
    /// Bytes the TCP adapter lets a connection have in flight.
    pub send_window: usize,
    /// Bytes the TCP adapter reads ahead before waiting for acknowledgment.
    pub recv_window: usize,
    /// Largest single read the TCP adapter performs.
    pub segment_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    /// Stop draining into the chunk queue once it holds this many bytes. 0 = unbounded.
    pub queue_high_water: usize,
    /// Which queued chunks a connection close throws away.
    pub close_scope: CloseScope,
}

/// Scope of the queue purge performed when a connection closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseScope {
    /// Only chunks tagged with the closing connection.
    #[default]
    Connection,
    /// Every queued chunk, whichever connection it came from.
    All,
}

impl std::str::FromStr for CloseScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connection" => Ok(CloseScope::Connection),
            "all" => Ok(CloseScope::All),
            other => Err(ConfigError::InvalidValue("close_scope", other.to_string())),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: 16,
            send_window: 8192,
            recv_window: 8192,
            segment_size: 1460,
        }
    }
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            queue_high_water: 0,
            close_scope: CloseScope::Connection,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tinylink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {0}: {1:?}")]
    InvalidValue(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TinylinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TinylinkConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TINYLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TinylinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TINYLINK_* overrides, looked up through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("TINYLINK_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(v) = var("TINYLINK_NETWORK__PORT") {
            self.network.port = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("network.port", v))?;
        }
        if let Some(v) = var("TINYLINK_NETWORK__MAX_CONNECTIONS") {
            self.network.max_connections = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("network.max_connections", v))?;
        }
        if let Some(v) = var("TINYLINK_BUFFERING__QUEUE_HIGH_WATER") {
            self.buffering.queue_high_water = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("buffering.queue_high_water", v))?;
        }
        if let Some(v) = var("TINYLINK_BUFFERING__CLOSE_SCOPE") {
            self.buffering.close_scope = v.parse()?;
        }
        self.validate()
    }

    /// Reject windows that would stall every connection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let network = &self.network;
        for (name, value) in [
            ("network.send_window", network.send_window),
            ("network.recv_window", network.recv_window),
            ("network.segment_size", network.segment_size),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(name, value.to_string()));
            }
        }
        Ok(())
    }
}
