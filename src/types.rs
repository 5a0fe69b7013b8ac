use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeState;

/// Status reported for an engine container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    /// Running, but the requested model is still downloading inside it
    PullingModel,
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::PullingModel => "pulling_model",
            ContainerStatus::Unknown => "unknown",
        }
    }

    /// True once the engine can take chat requests for its model.
    pub fn is_ready(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RuntimeState> for ContainerStatus {
    fn from(state: RuntimeState) -> Self {
        match state {
            RuntimeState::Created => ContainerStatus::Created,
            RuntimeState::Running => ContainerStatus::Running,
            RuntimeState::Paused => ContainerStatus::Paused,
            RuntimeState::Restarting => ContainerStatus::Restarting,
            RuntimeState::Removing => ContainerStatus::Removing,
            RuntimeState::Exited => ContainerStatus::Exited,
            RuntimeState::Dead => ContainerStatus::Dead,
            RuntimeState::Unknown => ContainerStatus::Unknown,
        }
    }
}

/// Logical model a container serves, read back from its environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEnvironment {
    pub model: Option<String>,
    pub parameters: Option<String>,
}

/// One row of the engine container listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub status: ContainerStatus,
    /// Host port, only while running
    pub port: Option<String>,
    pub environment: ContainerEnvironment,
}
