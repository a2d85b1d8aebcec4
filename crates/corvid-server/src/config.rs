//! Team server configuration, loaded from TOML.
//!
//! ```toml
//! bind_addr = "127.0.0.1:5004"
//! remote_auth = true
//! max_connections = 64
//! operators_path = "/home/op/.corvid/operators.json"
//! event_buffer = 256
//!
//! [logs]
//! level = "info"
//! unary_payloads = false
//! stream_payloads = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use corvid_protocol::DEFAULT_RPC_ADDR;

use crate::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP address the RPC server listens on.
    pub bind_addr: String,
    /// Require bearer tokens. When false every call is attributed to the
    /// local `server` operator; only use that on a trusted local channel.
    pub remote_auth: bool,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// JSON file holding operator records.
    pub operators_path: PathBuf,
    /// Per-subscriber event backlog before a slow client starts losing events.
    pub event_buffer: usize,
    pub logs: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Log request and response bodies of unary calls at debug level.
    pub unary_payloads: bool,
    /// Log every pushed event at debug level.
    pub stream_payloads: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_RPC_ADDR.to_string(),
            remote_auth: true,
            max_connections: 64,
            operators_path: Self::default_dir().join("operators.json"),
            event_buffer: 256,
            logs: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            unary_payloads: false,
            stream_payloads: false,
        }
    }
}

impl ServerConfig {
    /// `~/.corvid`, or `./.corvid` when no home directory is known.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".corvid")
    }

    pub fn default_path() -> PathBuf {
        Self::default_dir().join("server.toml")
    }

    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ServerError> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}
