//! Engine configuration.
//!
//! Precedence, lowest first: built-in defaults, TOML file, `RELAY_*` environment
//! variables. The CLI applies its own flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::gateway::GatewaySettings;
use crate::app::resolver::CascadePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub execution: ExecutionConfig,
    pub storage: StorageConfig,
    pub resolution: ResolutionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Base URL of the execution service. Unset = local staging only.
    pub base_url: Option<String>,

    /// Per-request timeout for dispatch and health probes.
    pub request_timeout_ms: u64,

    pub health_check_interval_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: 5_000,
            health_check_interval_secs: 30,
        }
    }
}

impl ExecutionConfig {
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            health_interval: Duration::from_secs(self.health_check_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from(".relay"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub cascade: CascadePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7420".to_string(),
        }
    }
}

impl RelayConfig {
    /// Defaults, then the TOML file at `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `RELAY_*` overrides read through `lookup`.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("RELAY_EXECUTION_URL") {
            let url = url.trim();
            self.execution.base_url = (!url.is_empty()).then(|| url.to_string());
        }
        if let Some(raw) = lookup("RELAY_REQUEST_TIMEOUT_MS") {
            self.execution.request_timeout_ms = parse_number("RELAY_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("RELAY_HEALTH_INTERVAL_SECS") {
            self.execution.health_check_interval_secs =
                parse_number("RELAY_HEALTH_INTERVAL_SECS", &raw)?;
        }
        if let Some(dir) = lookup("RELAY_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("RELAY_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(raw) = lookup("RELAY_CASCADE") {
            self.resolution.cascade = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "RELAY_CASCADE",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
    }
}
