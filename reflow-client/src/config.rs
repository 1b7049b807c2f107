//! Client-side configuration loading
//!
//! Reads `client.toml` from the reflow config directory. Missing files and
//! missing keys fall back to defaults; values that would break the pipeline
//! are rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use reflow_protocol::DomainId;
use reflow_utils::{client_config_file, ReflowError, Result};

use crate::pipeline::{PipelineConfig, DEFAULT_MAX_RETRIES};
use crate::resize::{DEFAULT_DEBOUNCE_MS, DEFAULT_FETCH_COALESCE_MS, DEFAULT_RPC_TIMEOUT_MS};

/// Upper bound for any pipeline timing value
const MAX_TIMING_MS: u64 = 60_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub resize: ResizeConfig,
    pub connection: ConnectionConfig,
}

/// Resize pipeline timing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    /// Quiet window before a resize counts as settled
    pub debounce_ms: u64,
    /// Window for batching fetch ranges
    pub fetch_coalesce_ms: u64,
    /// How long to wait for any server answer
    pub rpc_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            fetch_coalesce_ms: DEFAULT_FETCH_COALESCE_MS,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ResizeConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            fetch_coalesce: Duration::from_millis(self.fetch_coalesce_ms),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            max_retries: self.max_retries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server socket (defaults to the runtime dir socket)
    pub socket: Option<PathBuf>,
    /// Domain to attach to (defaults to the server's default domain)
    pub domain: Option<String>,
}

impl ConnectionConfig {
    pub fn domain_id(&self) -> Result<Option<DomainId>> {
        self.domain
            .as_deref()
            .map(|raw| {
                Uuid::parse_str(raw)
                    .map(DomainId)
                    .map_err(|e| ReflowError::config(format!("invalid domain id '{}': {}", raw, e)))
            })
            .transpose()
    }
}

impl ClientConfig {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from_path(&client_config_file())
    }

    /// Load from a specific path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No client config, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ReflowError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content).map_err(|e| ReflowError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(content).map_err(|e| ReflowError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let resize = &self.resize;
        for (name, value) in [
            ("debounce_ms", resize.debounce_ms),
            ("fetch_coalesce_ms", resize.fetch_coalesce_ms),
            ("rpc_timeout_ms", resize.rpc_timeout_ms),
        ] {
            if value > MAX_TIMING_MS {
                return Err(ReflowError::config(format!(
                    "resize.{} must be at most {}",
                    name, MAX_TIMING_MS
                )));
            }
        }
        if resize.debounce_ms == 0 {
            return Err(ReflowError::config("resize.debounce_ms must be positive"));
        }
        if resize.rpc_timeout_ms == 0 {
            return Err(ReflowError::config("resize.rpc_timeout_ms must be positive"));
        }
        self.connection.domain_id()?;
        Ok(())
    }
}
