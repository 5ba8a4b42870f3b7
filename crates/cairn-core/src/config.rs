//! Configuration for Cairn peers.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAIRN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cairn/config.toml
//!   3. ~/.config/cairn/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub network: NetworkConfig,
    pub key: KeyConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds and the client connects to.
    pub listen_addr: String,
    /// TCP port for record sessions.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Path to the pre-shared key file (at least 32 bytes).
    pub preshared_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How long a record waits for an ack before it is resent.
    pub retransmit_timeout_ms: u64,
    /// Cadence of the retransmission poll.
    pub retransmit_poll_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            key: KeyConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            port: 50400,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            preshared_path: PathBuf::from("final_key.bin"),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout_ms: 2000,
            retransmit_poll_ms: 500,
        }
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl NetworkConfig {
    /// `host:port` endpoint string for bind/connect.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.listen_addr, self.port)
    }
}

impl TransportConfig {
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    pub fn retransmit_poll(&self) -> Duration {
        Duration::from_millis(self.retransmit_poll_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("cairn")
}

fn home_dir() -> PathBuf {
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CairnConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::load_file(&path)?
        } else {
            CairnConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file at an explicit path.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
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
            let text = toml::to_string_pretty(&CairnConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CAIRN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CAIRN_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Ok(v) = std::env::var("CAIRN_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_KEY__PRESHARED_PATH") {
            self.key.preshared_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CAIRN_TRANSPORT__RETRANSMIT_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.transport.retransmit_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_TRANSPORT__RETRANSMIT_POLL_MS") {
            if let Ok(ms) = v.parse() {
                self.transport.retransmit_poll_ms = ms;
            }
        }
    }
}
