//! Proxy configuration management.

use crate::errors::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the proxy listens on for client connections
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// TCP port the proxy accepts client connections on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Wall-clock bound per merged operation, in milliseconds
    #[serde(default = "default_deadline_ms")]
    pub per_op_deadline_ms: u64,

    /// Backing file for the client directory (JSON); empty directory if unset
    #[serde(default)]
    pub directory_file: Option<PathBuf>,

    /// Upper bound on inbound BER element size, if any
    #[serde(default)]
    pub max_ber_size: Option<usize>,

    /// Whether mutating operations are refused. Must remain true.
    #[serde(default = "default_read_only")]
    pub read_only: bool,
}

fn default_listen_host() -> String {
    "0.0.0.0".into()
}

fn default_listen_port() -> u16 {
    10389
}

fn default_deadline_ms() -> u64 {
    5000
}

fn default_read_only() -> bool {
    true
}

impl ProxyConfig {
    /// Loads configuration from an optional file with `CERBERUS_*`
    /// environment variables layered on top.
    ///
    /// Recognized variables mirror the field names, e.g.
    /// `CERBERUS_LISTEN_PORT`, `CERBERUS_PER_OP_DEADLINE_MS`,
    /// `CERBERUS_DIRECTORY_FILE`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("CERBERUS"))
            .build()?;

        let cfg: ProxyConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads configuration from the environment alone.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Returns the per-operation deadline as a Duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.per_op_deadline_ms)
    }

    /// Returns the listen address in `host:port` form.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.read_only {
            return Err(ProxyError::Configuration(
                "read_only must remain enabled; write merging is not supported".into(),
            ));
        }

        if self.listen_host.is_empty() {
            return Err(ProxyError::Configuration(
                "listen_host cannot be empty".into(),
            ));
        }

        if self.per_op_deadline_ms == 0 {
            return Err(ProxyError::Configuration(
                "per_op_deadline_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            per_op_deadline_ms: default_deadline_ms(),
            directory_file: None,
            max_ber_size: None,
            read_only: default_read_only(),
        }
    }
}
