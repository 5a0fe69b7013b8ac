//! llmdock - container orchestration for locally hosted LLM inference engines
//!
//! Each (model, parameters) pair gets its own Ollama container named
//! `{model}_{parameters}`, published on `base_port + model id`, attached to a
//! shared bridge network and granted every available GPU. The container's
//! environment records what it serves; there is no other state.

pub mod ai;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod network;
pub mod orchestrator;
pub mod runtime;
pub mod types;

pub use config::{AiModel, DockConfig, ModelCatalog, ModelVersion};
pub use error::{DockError, ErrorKind, Result};
pub use orchestrator::{Orchestrator, canonical_name};

// Export main types at root level
pub use types::{ContainerEnvironment, ContainerInfo, ContainerStatus};

/// Re-exports for easier API usage
pub mod api {
    pub use crate::ai::{ChatMessage, ChatRequest, OllamaClient, Role};
    pub use crate::config::{
        AiModel, DaemonConfig, DockConfig, EngineConfig, ModelCatalog, ModelVersion,
        StatusConfig, StatusProbe,
    };
    pub use crate::monitoring::TracingConfig;
    pub use crate::runtime::docker::{DockerConnector, DockerRuntime};
    pub use crate::runtime::memory::{InMemoryRuntime, MemoryConnector};
    pub use crate::runtime::{
        ContainerMetadata, ContainerRecord, ContainerRuntime, ImageRecord, NetworkRecord,
        RuntimeConnector, RuntimeState,
    };
    pub use crate::{ContainerInfo, ContainerStatus, ErrorKind, Orchestrator};
}
