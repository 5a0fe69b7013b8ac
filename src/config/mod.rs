use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

pub mod catalog;

pub use catalog::{AiModel, ModelCatalog, ModelVersion};

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "LLMDOCK_CONFIG";

/// Top-level llmdock configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DockConfig {
    pub daemon: DaemonConfig,
    pub engine: EngineConfig,
    pub status: StatusConfig,
}

/// How to reach the container daemon and how patient to be with it
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// `unix://` socket or `tcp://`/`http://` address; local defaults when unset
    pub host: Option<String>,
    pub timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub read_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout_secs: 30,
            pull_timeout_secs: 1800,
            read_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

impl DaemonConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Inference engine container settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub image: String,
    pub tag: String,
    /// Port the engine listens on inside its container
    pub service_port: u16,
    /// Host port of the model with numeric id 0
    pub base_port: u16,
    pub network: String,
    /// Delay between starting the engine and issuing the model pull
    pub settle_secs: u64,
    pub gpus: bool,
    /// Command-line fragment identifying an in-progress model pull
    pub pull_marker: String,
    /// Host name the chat caller uses to reach published engine ports
    pub host: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            image: "ollama/ollama".to_string(),
            tag: "latest".to_string(),
            service_port: 11434,
            base_port: 11434,
            network: "chatbot_network".to_string(),
            settle_secs: 2,
            gpus: true,
            pull_marker: "ollama pull".to_string(),
            host: "localhost".to_string(),
        }
    }
}

impl EngineConfig {
    /// Fully qualified image reference, e.g. `ollama/ollama:latest`
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Host port for a model: `base_port + model_id`.
    pub fn host_port_for(&self, model_id: u32) -> Result<u16> {
        u16::try_from(model_id)
            .ok()
            .and_then(|id| self.base_port.checked_add(id))
            .ok_or_else(|| {
                ConfigError::PortOverflow {
                    base: self.base_port,
                    model_id,
                }
                .into()
            })
    }

    /// Port key as the daemon reports it, e.g. `11434/tcp`
    pub fn service_port_key(&self) -> String {
        format!("{}/tcp", self.service_port)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// Which signal decides the synthetic "pulling model" status
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StatusProbe {
    /// Inspect the container's process table only
    #[default]
    Process,
    /// Ask the engine for its model list first, fall back to the process table
    Engine,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    pub probe: StatusProbe,
    /// Upper bound on one engine model-list request
    pub engine_timeout_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            probe: StatusProbe::Process,
            engine_timeout_secs: 3,
        }
    }
}

impl StatusConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

impl DockConfig {
    /// Load configuration from default locations.
    ///
    /// `$LLMDOCK_CONFIG` wins, then `<config_dir>/llmdock/config.toml`. A missing
    /// default file yields the built-in defaults.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(path);
        }

        let path = Self::default_path();
        if path.exists() {
            Self::from_path(&path)
        } else {
            debug!("No config at {:?}, using defaults", path);
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("llmdock")
            .join("config.toml")
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        info!("📄 Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DockConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `DOCKER=true` means the caller itself runs in a container and reaches
    /// published ports through the host gateway.
    pub fn apply_env_overrides(&mut self) {
        if std::env::var("DOCKER").is_ok_and(|v| v == "true") {
            debug!("DOCKER=true, engine host set to host.docker.internal");
            self.engine.host = "host.docker.internal".to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;

        if engine.image.is_empty() || engine.image.contains(':') {
            return Err(invalid(format!(
                "engine.image must be a bare repository name, got '{}'",
                engine.image
            )));
        }
        if engine.tag.is_empty() {
            return Err(invalid("engine.tag cannot be empty"));
        }
        if engine.service_port == 0 || engine.base_port == 0 {
            return Err(invalid("engine ports must be non-zero"));
        }
        if engine.network.is_empty() {
            return Err(invalid("engine.network cannot be empty"));
        }
        if engine.pull_marker.trim().is_empty() {
            return Err(invalid("engine.pull_marker cannot be empty"));
        }
        if self.daemon.timeout_secs == 0 || self.daemon.pull_timeout_secs == 0 {
            return Err(invalid("daemon timeouts must be non-zero"));
        }
        if self.status.engine_timeout_secs == 0 {
            return Err(invalid("status.engine_timeout_secs must be non-zero"));
        }

        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> crate::DockError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
    .into()
}
