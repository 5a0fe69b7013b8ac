//! Container runtime seam.
//!
//! The orchestrator talks to the daemon only through [`ContainerRuntime`], and
//! only sees the records defined here, never SDK types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::error::RuntimeResult;

pub mod docker;
pub mod environment;
pub mod guard;
pub mod memory;
pub mod status;

pub use environment::ContainerMetadata;

/// Raw lifecycle state as the daemon reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl RuntimeState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "created" => RuntimeState::Created,
            "running" => RuntimeState::Running,
            "paused" => RuntimeState::Paused,
            "restarting" => RuntimeState::Restarting,
            "removing" => RuntimeState::Removing,
            "exited" => RuntimeState::Exited,
            "dead" => RuntimeState::Dead,
            _ => RuntimeState::Unknown,
        }
    }

    /// States in which the container may hold its host port.
    pub fn holds_port(&self) -> bool {
        matches!(
            self,
            RuntimeState::Running | RuntimeState::Paused | RuntimeState::Restarting
        )
    }
}

/// Whether an image reference names `wanted`, treating a missing tag as `latest`.
pub fn matches_reference(reference: &str, wanted: &str) -> bool {
    fn tagged(r: &str) -> String {
        let name = r.rsplit('/').next().unwrap_or(r);
        if name.contains(':') || r.contains('@') {
            r.to_string()
        } else {
            format!("{}:latest", r)
        }
    }
    tagged(reference) == tagged(wanted)
}

/// The daemon's view of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: RuntimeState,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    /// Container port key (`11434/tcp`) to published host port
    pub ports: HashMap<String, String>,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.state == RuntimeState::Running
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        environment::get_env(&self.env, key)
    }

    pub fn metadata(&self) -> Option<ContainerMetadata> {
        ContainerMetadata::from_env(&self.env)
    }

    pub fn host_port(&self, port_key: &str) -> Option<&str> {
        self.ports.get(port_key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
    pub driver: String,
}

/// Output of `top` inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTable {
    pub titles: Vec<String>,
    pub processes: Vec<Vec<String>>,
}

impl ProcessTable {
    /// Command lines, taken from the `CMD`/`COMMAND` column when present.
    pub fn command_lines(&self) -> Vec<String> {
        let column = self
            .titles
            .iter()
            .position(|t| t == "CMD" || t == "COMMAND");

        self.processes
            .iter()
            .map(|row| match column {
                Some(idx) => row.get(idx).cloned().unwrap_or_default(),
                None => row.join(" "),
            })
            .collect()
    }
}

/// Everything needed to create an engine container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    /// Port key inside the container, e.g. `11434/tcp`
    pub container_port: String,
    pub host_port: u16,
    /// Request every available GPU
    pub gpus: bool,
    pub env: Vec<String>,
}

impl ContainerSpec {
    /// Rebuild the spec a container was created from, so it can be recreated.
    pub fn from_record(
        record: &ContainerRecord,
        network: &str,
        container_port: &str,
        gpus: bool,
    ) -> Option<Self> {
        let host_port = record.host_port(container_port)?.parse().ok()?;
        Some(Self {
            name: record.name.clone(),
            image: record.image.clone(),
            network: network.to_string(),
            container_port: container_port.to_string(),
            host_port,
            gpus,
            env: record.env.clone(),
        })
    }
}

/// Daemon operations the orchestrator depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> RuntimeResult<()>;

    async fn inspect_image(&self, image: &str) -> RuntimeResult<ImageRecord>;
    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<ImageRecord>;

    /// All containers, any state, created from `ancestor`
    async fn list_containers(&self, ancestor: &str) -> RuntimeResult<Vec<ContainerRecord>>;
    async fn inspect_container(&self, name: &str) -> RuntimeResult<ContainerRecord>;
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerRecord>;
    async fn start_container(&self, name: &str) -> RuntimeResult<()>;
    async fn stop_container(&self, name: &str) -> RuntimeResult<()>;
    /// Forced removal
    async fn remove_container(&self, name: &str) -> RuntimeResult<()>;
    async fn top(&self, name: &str) -> RuntimeResult<ProcessTable>;
    /// Launch a command inside the container without waiting for it
    async fn exec_detached(&self, name: &str, cmd: Vec<String>) -> RuntimeResult<()>;

    async fn inspect_network(&self, name: &str) -> RuntimeResult<NetworkRecord>;
    async fn create_network(&self, name: &str, driver: &str) -> RuntimeResult<NetworkRecord>;
}

/// Produces connected runtime handles
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self) -> RuntimeResult<Arc<dyn ContainerRuntime>>;
}
