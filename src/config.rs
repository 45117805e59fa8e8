//! Process configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or
//! no file at all) yields a working relay on the standard ports.
//!
//! ```toml
//! log_level = "info"
//!
//! [registry]
//! hostname = "ingest-1"
//! heartbeat_interval = 15
//!
//! [server]
//! handshake_addr = "0.0.0.0:8084"
//! message_addr = "0.0.0.0:1935"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::registry::RegistryConfig;
use crate::server::ServerConfig;

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_level: String,

    pub registry: RegistryConfig,

    pub server: ServerConfig,

    pub noop: NoopConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            registry: RegistryConfig::default(),
            server: ServerConfig::default(),
            noop: NoopConfig::default(),
        }
    }
}

/// Settings for the built-in service used when no external service is wired in
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NoopConfig {
    /// Stream key accepted for every channel
    pub secret: String,
}

impl Default for NoopConfig {
    fn default() -> Self {
        Self {
            secret: "secret".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}

/// Shortest period accepted for periodic tasks
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Durations expressed as whole, non-zero seconds in configuration files
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match u64::deserialize(deserializer)? {
            0 => Err(D::Error::custom("duration must be at least one second")),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}
