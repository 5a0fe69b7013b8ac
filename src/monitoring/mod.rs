//! Logging setup for the binary and for embedding applications.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Result;

pub const LOG_FILE_PREFIX: &str = "llmdock.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// JSON console output instead of compact text
    pub json: bool,
    /// Daily-rolling JSON log files go here when set
    pub log_dir: Option<PathBuf>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

impl TracingConfig {
    pub fn for_cli(verbose: bool, json: bool) -> Self {
        Self {
            log_level: if verbose { "debug" } else { "info" }.to_string(),
            json,
            log_dir: None,
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Install the global subscriber. Keep the returned guard alive for as
    /// long as file logs should be flushed.
    pub fn init(&self) -> Result<Option<WorkerGuard>> {
        let console = if self.json {
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer().with_target(false).compact().boxed()
        };

        let (file, guard) = match &self.log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(self.filter())
            .with(console)
            .with(file)
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {}", err))?;

        Ok(guard)
    }
}
