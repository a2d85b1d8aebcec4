//! Client configuration (`~/.corvid/client.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use corvid_protocol::{DEFAULT_RPC_ADDR, TASK_FETCH_TIMEOUT_SECS};

use crate::ClientError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Team server address.
    pub server_addr: String,
    /// Operator bearer token. Not needed against a server without remote auth.
    pub token: Option<String>,
    /// Bound on each task content fetch triggered by a task event.
    pub fetch_timeout_secs: u64,
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_RPC_ADDR.to_string(),
            token: None,
            fetch_timeout_secs: TASK_FETCH_TIMEOUT_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".corvid")
            .join("client.toml")
    }

    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ClientError> {
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

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}
