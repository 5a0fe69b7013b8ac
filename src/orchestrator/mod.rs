//! Container orchestrator: one engine container per (model, parameters).
//!
//! Every operation comes in two forms. The `try_` form returns the error; the
//! plain form collapses failures to `None`/`false`/empty and remembers the
//! error kind in [`Orchestrator::last_error`].

use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::ai::OllamaClient;
use crate::config::{AiModel, DockConfig, ModelVersion, StatusProbe};
use crate::error::{ErrorKind, Result, RuntimeError, RuntimeResult};
use crate::network;
use crate::runtime::docker::DockerConnector;
use crate::runtime::environment::{
    self, ContainerMetadata, MODEL_KEY, PARAMETERS_KEY, PORT_KEY,
};
use crate::runtime::status::{self, PullSignal};
use crate::runtime::{
    ContainerRecord, ContainerRuntime, ContainerSpec, ImageRecord, NetworkRecord,
    RuntimeConnector,
};
use crate::types::{ContainerEnvironment, ContainerInfo, ContainerStatus};

pub mod locks;
pub mod naming;

pub use locks::KeyedLocks;
pub use naming::canonical_name;

pub struct Orchestrator {
    config: DockConfig,
    connector: Arc<dyn RuntimeConnector>,
    handle: RwLock<Option<Arc<dyn ContainerRuntime>>>,
    locks: KeyedLocks,
    last_error: Mutex<Option<ErrorKind>>,
}

impl Orchestrator {
    /// Build an orchestrator and try to connect once. A failed connection is
    /// not fatal: operations retry it on demand.
    pub async fn new(config: DockConfig, connector: Arc<dyn RuntimeConnector>) -> Self {
        let orchestrator = Self {
            config,
            connector,
            handle: RwLock::new(None),
            locks: KeyedLocks::new(),
            last_error: Mutex::new(None),
        };
        orchestrator.connect().await;
        orchestrator
    }

    /// Orchestrator on the Docker daemon named by `config.daemon`.
    pub async fn connect_local(config: DockConfig) -> Self {
        let connector = Arc::new(DockerConnector::new(config.daemon.clone()));
        Self::new(config, connector).await
    }

    pub fn config(&self) -> &DockConfig {
        &self.config
    }

    /// Kind of the most recent failure swallowed by a sentinel operation
    pub fn last_error(&self) -> Option<ErrorKind> {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn settle<T>(&self, operation: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = None;
                Some(value)
            }
            Err(err) => {
                let kind = err.kind();
                warn!("⚠️  {} failed [{}]: {}", operation, kind, err);
                if kind == ErrorKind::ConnectionUnavailable {
                    self.disconnect();
                }
                *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(kind);
                None
            }
        }
    }

    // --- connection ---

    pub async fn try_connect(&self) -> Result<()> {
        let runtime = self.connector.connect().await?;
        *self.handle.write().unwrap_or_else(|p| p.into_inner()) = Some(runtime);
        info!("🔌 Orchestrator connected to container runtime");
        Ok(())
    }

    pub async fn connect(&self) -> bool {
        let result = self.try_connect().await;
        self.settle("connect", result).is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.handle
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    fn disconnect(&self) {
        if self
            .handle
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .is_some()
        {
            warn!("🔌 Dropped container runtime handle");
        }
    }

    /// Current handle, reconnecting exactly once when there is none.
    async fn runtime(&self) -> Result<Arc<dyn ContainerRuntime>> {
        let current = self
            .handle
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(runtime) = current {
            return Ok(runtime);
        }

        debug!("Not connected, reconnecting");
        self.try_connect().await?;
        self.handle
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| {
                RuntimeError::ConnectionUnavailable {
                    reason: "runtime handle lost during reconnect".to_string(),
                }
                .into()
            })
    }

    // --- image ---

    pub async fn try_is_image_pulled(&self) -> Result<bool> {
        let runtime = self.runtime().await?;
        let image = self.config.engine.image_ref();
        match runtime.inspect_image(&image).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// False on any lookup failure.
    pub async fn is_image_pulled(&self) -> bool {
        let result = self.try_is_image_pulled().await;
        self.settle("is_image_pulled", result).unwrap_or(false)
    }

    /// Single attempt; pulls are large and operator-triggered.
    pub async fn try_pull_image(&self) -> Result<ImageRecord> {
        let runtime = self.runtime().await?;
        let engine = &self.config.engine;
        info!("📥 Pulling engine image {}", engine.image_ref());
        let image = runtime.pull_image(&engine.image, &engine.tag).await?;
        info!("✅ Engine image {} ready", engine.image_ref());
        Ok(image)
    }

    pub async fn pull_image(&self) -> Option<ImageRecord> {
        let result = self.try_pull_image().await;
        self.settle("pull_image", result)
    }

    // --- listing ---

    pub async fn try_list_available(&self) -> Result<Vec<ContainerInfo>> {
        let runtime = self.runtime().await?;
        let records = runtime
            .list_containers(&self.config.engine.image_ref())
            .await?;

        let mut available = Vec::with_capacity(records.len());
        for record in records {
            let status = self.classify(runtime.as_ref(), &record).await;
            available.push(self.describe(record, status));
        }
        debug!("{} engine containers", available.len());
        Ok(available)
    }

    pub async fn list_available(&self) -> Vec<ContainerInfo> {
        let result = self.try_list_available().await;
        self.settle("list_available", result).unwrap_or_default()
    }

    fn describe(&self, record: ContainerRecord, status: ContainerStatus) -> ContainerInfo {
        let port = if record.is_running() {
            record
                .host_port(&self.config.engine.service_port_key())
                .or_else(|| record.env_value(PORT_KEY))
                .map(str::to_string)
        } else {
            None
        };

        ContainerInfo {
            environment: ContainerEnvironment {
                model: record.env_value(MODEL_KEY).map(str::to_string),
                parameters: record
                    .env_value(PARAMETERS_KEY)
                    .map(str::to_string),
            },
            name: record.name,
            status,
            port,
        }
    }

    async fn classify(&self, runtime: &dyn ContainerRuntime, record: &ContainerRecord) -> ContainerStatus {
        if !record.is_running() {
            return status::classify(record.state, PullSignal::Idle);
        }

        if self.config.status.probe == StatusProbe::Engine {
            if let Some(metadata) = record.metadata() {
                let client =
                    OllamaClient::for_endpoint(&self.config.engine.host, &metadata.port.to_string())
                        .with_list_timeout(self.config.status.engine_timeout());
                match client.has_model(&metadata.model_tag()).await {
                    Ok(true) => return status::classify(record.state, PullSignal::Idle),
                    Ok(false) => {}
                    Err(err) => debug!("Engine probe for {} failed: {}", record.name, err),
                }
            }
        }

        let signal = match runtime.top(&record.name).await {
            Ok(table) => status::detect_pull(&table, &self.config.engine.pull_marker),
            Err(err) => {
                debug!("Process table of {} unavailable: {}", record.name, err);
                PullSignal::Idle
            }
        };
        status::classify(record.state, signal)
    }

    // --- lookup ---

    pub async fn try_get_container(&self, name: &str) -> Result<Option<ContainerRecord>> {
        let runtime = self.runtime().await?;
        Ok(lookup(runtime.as_ref(), name).await?)
    }

    pub async fn get_container(&self, name: &str) -> Option<ContainerRecord> {
        let result = self.try_get_container(name).await;
        self.settle("get_container", result).flatten()
    }

    // --- network ---

    pub async fn try_get_network(&self, name: &str) -> Result<Option<NetworkRecord>> {
        let runtime = self.runtime().await?;
        Ok(network::get_network(runtime.as_ref(), name).await?)
    }

    pub async fn get_network(&self, name: &str) -> Option<NetworkRecord> {
        let result = self.try_get_network(name).await;
        self.settle("get_network", result).flatten()
    }

    pub async fn try_ensure_network(&self, name: &str) -> Result<NetworkRecord> {
        let runtime = self.runtime().await?;
        Ok(network::ensure_network(runtime.as_ref(), name).await?)
    }

    pub async fn ensure_network(&self, name: &str) -> Option<NetworkRecord> {
        let result = self.try_ensure_network(name).await;
        self.settle("ensure_network", result)
    }

    // --- lifecycle ---

    /// Bring up the container serving `model` at `version`.
    ///
    /// Whatever holds the model's host port is stopped first. An existing
    /// container under the canonical name is started and returned as is.
    /// Otherwise a new one is created, started, and told to pull the model;
    /// the caller polls [`Orchestrator::list_available`] until it is ready.
    pub async fn try_run_container(
        &self,
        model: &AiModel,
        version: &ModelVersion,
    ) -> Result<ContainerRecord> {
        let name = canonical_name(&model.model, &version.parameters)?;
        let port = self.config.engine.host_port_for(model.id)?;
        let runtime = self.runtime().await?;

        let _port_guard = self.locks.lock(&naming::port_key(port)).await;
        let _name_guard = self.locks.lock(&name).await;

        info!("🚀 Running {} on host port {}", name, port);
        self.reconcile_port(runtime.as_ref(), port, &name).await?;

        if let Some(existing) = lookup(runtime.as_ref(), &name).await? {
            return self.resume(runtime.as_ref(), existing).await;
        }

        let engine = &self.config.engine;
        network::ensure_network(runtime.as_ref(), &engine.network).await?;

        let metadata = ContainerMetadata::new(&model.model, &version.parameters, port);
        let spec = ContainerSpec {
            name: name.clone(),
            image: engine.image_ref(),
            network: engine.network.clone(),
            container_port: engine.service_port_key(),
            host_port: port,
            gpus: engine.gpus,
            env: metadata.to_env(),
        };

        match runtime.create_container(&spec).await {
            Ok(_) => info!("📦 Created container {}", name),
            Err(err) if err.is_conflict() => {
                debug!("{} was created concurrently, reusing it", name);
                let existing = runtime.inspect_container(&name).await?;
                return self.resume(runtime.as_ref(), existing).await;
            }
            Err(err) => return Err(err.into()),
        }

        self.launch(runtime.as_ref(), &name, &metadata).await?;
        Ok(runtime.inspect_container(&name).await?)
    }

    pub async fn run_container(
        &self,
        model: &AiModel,
        version: &ModelVersion,
    ) -> Option<ContainerRecord> {
        let result = self.try_run_container(model, version).await;
        self.settle("run_container", result)
    }

    /// Stop every other engine container whose metadata claims `port`.
    async fn reconcile_port(
        &self,
        runtime: &dyn ContainerRuntime,
        port: u16,
        name: &str,
    ) -> RuntimeResult<()> {
        let containers = runtime
            .list_containers(&self.config.engine.image_ref())
            .await?;

        let holders = containers.iter().filter(|c| {
            c.name != name
                && c.state.holds_port()
                && c.env_value(PORT_KEY).and_then(|p| p.parse::<u16>().ok()) == Some(port)
        });

        for holder in holders {
            info!("🔁 Evicting {} from host port {}", holder.name, port);
            match runtime.stop_container(&holder.name).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Start an already existing container without touching its metadata.
    ///
    /// Stopping an engine kills any pull running inside it, so a container
    /// that was not running gets its model pull launched again.
    async fn resume(
        &self,
        runtime: &dyn ContainerRuntime,
        existing: ContainerRecord,
    ) -> Result<ContainerRecord> {
        if existing.is_running() {
            debug!("{} already running", existing.name);
            return Ok(existing);
        }
        info!("▶️  Starting existing container {}", existing.name);
        runtime.start_container(&existing.name).await?;

        if let Some(metadata) = existing.metadata() {
            if let Err(err) = self.begin_pull(runtime, &existing.name, &metadata).await {
                if let Err(stop_err) = runtime.stop_container(&existing.name).await {
                    debug!("Stop of {} after failed pull failed: {}", existing.name, stop_err);
                }
                return Err(RuntimeError::PartialFailure {
                    name: existing.name.clone(),
                    stage: "model pull".to_string(),
                    reason: err.to_string(),
                }
                .into());
            }
        }
        Ok(runtime.inspect_container(&existing.name).await?)
    }

    /// Start a freshly created container and launch the in-container pull.
    /// Leaves nothing behind on failure.
    async fn launch(
        &self,
        runtime: &dyn ContainerRuntime,
        name: &str,
        metadata: &ContainerMetadata,
    ) -> Result<()> {
        if let Err(first) = runtime.start_container(name).await {
            warn!("⚠️  Start of {} failed ({}), retrying once", name, first);
            if let Err(err) = runtime.start_container(name).await {
                discard(runtime, name).await;
                return Err(RuntimeError::PartialFailure {
                    name: name.to_string(),
                    stage: "start".to_string(),
                    reason: err.to_string(),
                }
                .into());
            }
        }
        info!("✅ Started container {}", name);

        if let Err(err) = self.begin_pull(runtime, name, metadata).await {
            if let Err(stop_err) = runtime.stop_container(name).await {
                debug!("Stop of {} during cleanup failed: {}", name, stop_err);
            }
            discard(runtime, name).await;
            return Err(RuntimeError::PartialFailure {
                name: name.to_string(),
                stage: "model pull".to_string(),
                reason: err.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Give the engine the settle delay, then exec the pull detached.
    async fn begin_pull(
        &self,
        runtime: &dyn ContainerRuntime,
        name: &str,
        metadata: &ContainerMetadata,
    ) -> RuntimeResult<()> {
        let settle = self.config.engine.settle_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let tag = metadata.model_tag();
        let cmd: Vec<String> = self
            .config
            .engine
            .pull_marker
            .split_whitespace()
            .map(str::to_string)
            .chain(std::iter::once(tag.clone()))
            .collect();

        runtime.exec_detached(name, cmd).await?;
        info!("📥 Pulling model {} inside {}", tag, name);
        Ok(())
    }

    /// No-op when the container does not exist.
    pub async fn try_stop_container(&self, name: &str) -> Result<()> {
        let runtime = self.runtime().await?;
        let _guard = self.locks.lock(name).await;

        match runtime.stop_container(name).await {
            Ok(()) => {
                info!("⏹️  Stopped container {}", name);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                debug!("Stop of {}: no such container", name);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn stop_container(&self, name: &str) -> bool {
        let result = self.try_stop_container(name).await;
        self.settle("stop_container", result).is_some()
    }

    /// Stop, then delete. No-op when the container does not exist.
    pub async fn try_remove_container(&self, name: &str) -> Result<()> {
        let runtime = self.runtime().await?;
        let _guard = self.locks.lock(name).await;

        match runtime.stop_container(name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!("Remove of {}: no such container", name);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        match runtime.remove_container(name).await {
            Ok(()) => {
                info!("🗑️  Removed container {}", name);
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn remove_container(&self, name: &str) -> bool {
        let result = self.try_remove_container(name).await;
        self.settle("remove_container", result).is_some()
    }

    // --- endpoint discovery ---

    /// The `port` metadata of the serving container, only while it runs.
    pub async fn try_get_container_port(
        &self,
        model: &str,
        parameters: &str,
    ) -> Result<Option<String>> {
        let name = canonical_name(model, parameters)?;
        let runtime = self.runtime().await?;

        let port = lookup(runtime.as_ref(), &name)
            .await?
            .filter(ContainerRecord::is_running)
            .and_then(|record| record.env_value(PORT_KEY).map(str::to_string));
        Ok(port)
    }

    pub async fn get_container_port(&self, model: &str, parameters: &str) -> Option<String> {
        let result = self.try_get_container_port(model, parameters).await;
        self.settle("get_container_port", result).flatten()
    }

    /// Chat client for the engine serving `model:parameters`, if it runs.
    pub async fn inference_client(&self, model: &str, parameters: &str) -> Option<OllamaClient> {
        let port = self.get_container_port(model, parameters).await?;
        Some(OllamaClient::for_endpoint(&self.config.engine.host, &port))
    }

    // --- metadata ---

    pub async fn try_get_container_env(&self, name: &str, key: &str) -> Result<Option<String>> {
        let runtime = self.runtime().await?;
        let record = runtime.inspect_container(name).await?;
        Ok(record.env_value(key).map(str::to_string))
    }

    pub async fn get_container_env(&self, name: &str, key: &str) -> Option<String> {
        let result = self.try_get_container_env(name, key).await;
        self.settle("get_container_env", result).flatten()
    }

    /// Environment is fixed at creation, so changing it recreates the
    /// container with the merged list. A running container comes back running
    /// and re-pulls its model.
    pub async fn try_set_container_env(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<ContainerRecord> {
        if key.is_empty() || key.contains('=') {
            return Err(RuntimeError::InvalidRequest {
                reason: format!("'{}' is not a valid environment key", key),
            }
            .into());
        }
        if key == PORT_KEY {
            return Err(RuntimeError::InvalidRequest {
                reason: "the port entry follows the host port binding".to_string(),
            }
            .into());
        }
        if key == MODEL_KEY || key == PARAMETERS_KEY {
            return Err(RuntimeError::InvalidRequest {
                reason: format!("'{}' is fixed by the container name", key),
            }
            .into());
        }

        let runtime = self.runtime().await?;
        let _guard = self.locks.lock(name).await;

        let record = runtime.inspect_container(name).await?;
        if record.env_value(key) == Some(value) {
            debug!("{} already has {}={}", name, key, value);
            return Ok(record);
        }

        let engine = &self.config.engine;
        let original =
            ContainerSpec::from_record(&record, &engine.network, &engine.service_port_key(), engine.gpus)
                .ok_or_else(|| RuntimeError::InvalidRequest {
                    reason: format!("{} publishes no engine port", name),
                })?;
        let mut spec = original.clone();
        environment::set_env(&mut spec.env, key, value);

        info!("♻️  Recreating {} with {}={}", name, key, value);
        let was_running = record.is_running();
        if record.state.holds_port() {
            runtime.stop_container(name).await?;
        }
        runtime.remove_container(name).await?;

        let created = match network::ensure_network(runtime.as_ref(), &spec.network).await {
            Ok(_) => runtime.create_container(&spec).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = created {
            warn!("⚠️  Recreating {} failed ({}), restoring it", name, err);
            self.restore(runtime.as_ref(), &original, was_running).await;
            return Err(err.into());
        }

        if was_running {
            self.bring_up(runtime.as_ref(), name, &spec.env).await?;
        }
        Ok(runtime.inspect_container(name).await?)
    }

    /// Start a recreated container, pulling its model when it has metadata.
    async fn bring_up(&self, runtime: &dyn ContainerRuntime, name: &str, env: &[String]) -> Result<()> {
        match ContainerMetadata::from_env(env) {
            Some(metadata) => self.launch(runtime, name, &metadata).await,
            None => Ok(runtime.start_container(name).await?),
        }
    }

    /// Put back the container a failed recreation removed.
    async fn restore(&self, runtime: &dyn ContainerRuntime, original: &ContainerSpec, was_running: bool) {
        if let Err(err) = runtime.create_container(original).await {
            warn!("⚠️  Could not restore {}: {}", original.name, err);
            return;
        }
        if was_running {
            if let Err(err) = self.bring_up(runtime, &original.name, &original.env).await {
                warn!("⚠️  Restored {} but could not start it: {}", original.name, err);
                return;
            }
        }
        info!("↩️  Restored {}", original.name);
    }

    pub async fn set_container_env(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Option<ContainerRecord> {
        let result = self.try_set_container_env(name, key, value).await;
        self.settle("set_container_env", result)
    }
}

async fn lookup(runtime: &dyn ContainerRuntime, name: &str) -> RuntimeResult<Option<ContainerRecord>> {
    match runtime.inspect_container(name).await {
        Ok(record) => Ok(Some(record)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

async fn discard(runtime: &dyn ContainerRuntime, name: &str) {
    match runtime.remove_container(name).await {
        Ok(()) => info!("🧹 Removed incomplete container {}", name),
        Err(err) => warn!("⚠️  Could not remove incomplete container {}: {}", name, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Resource;
    use crate::runtime::{MockContainerRuntime, MockRuntimeConnector, RuntimeState};
    use std::collections::HashMap;

    fn offline_connector(times: usize) -> MockRuntimeConnector {
        let mut connector = MockRuntimeConnector::new();
        connector.expect_connect().times(times).returning(|| {
            Err(RuntimeError::ConnectionUnavailable {
                reason: "no daemon".to_string(),
            })
        });
        connector
    }

    #[tokio::test]
    async fn test_construction_survives_missing_daemon() {
        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(offline_connector(1))).await;
        assert!(!orchestrator.is_connected());
        assert_eq!(orchestrator.last_error(), Some(ErrorKind::ConnectionUnavailable));
    }

    #[tokio::test]
    async fn test_disconnected_pull_reconnects_once_and_returns_none() {
        // One attempt at construction, exactly one more for the pull.
        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(offline_connector(2))).await;

        assert_eq!(orchestrator.pull_image().await, None);
        assert_eq!(orchestrator.last_error(), Some(ErrorKind::ConnectionUnavailable));
    }

    #[tokio::test]
    async fn test_disconnected_sentinels() {
        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(offline_connector(6))).await;

        assert!(!orchestrator.is_image_pulled().await);
        assert!(orchestrator.list_available().await.is_empty());
        assert_eq!(orchestrator.get_container("llama2_7b").await, None);
        assert_eq!(orchestrator.get_container_port("llama2", "7b").await, None);
        assert!(!orchestrator.stop_container("llama2_7b").await);
    }

    fn connector_for(runtime: MockContainerRuntime) -> MockRuntimeConnector {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);
        let mut connector = MockRuntimeConnector::new();
        connector
            .expect_connect()
            .returning(move || Ok(runtime.clone()));
        connector
    }

    #[tokio::test]
    async fn test_image_lookup_error_is_false() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_inspect_image()
            .returning(|_| Err(RuntimeError::daemon("inspect_image", "boom")));

        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(connector_for(runtime))).await;
        assert!(!orchestrator.is_image_pulled().await);
        assert_eq!(orchestrator.last_error(), Some(ErrorKind::DaemonError));
        assert!(orchestrator.is_connected());
    }

    #[tokio::test]
    async fn test_image_not_found_is_a_clean_false() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_inspect_image()
            .withf(|image| image == "ollama/ollama:latest")
            .returning(|image| Err(RuntimeError::not_found(Resource::Image, image)));

        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(connector_for(runtime))).await;
        assert!(!orchestrator.is_image_pulled().await);
        assert_eq!(orchestrator.last_error(), None);
    }

    #[tokio::test]
    async fn test_connection_loss_drops_handle() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_containers().returning(|_| {
            Err(RuntimeError::ConnectionUnavailable {
                reason: "socket closed".to_string(),
            })
        });

        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(connector_for(runtime))).await;
        assert!(orchestrator.is_connected());
        assert!(orchestrator.list_available().await.is_empty());
        assert!(!orchestrator.is_connected());
    }

    #[tokio::test]
    async fn test_stopped_container_has_no_port() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_inspect_container().returning(|name| {
            Ok(ContainerRecord {
                id: "c1".to_string(),
                name: name.to_string(),
                image: "ollama/ollama:latest".to_string(),
                state: RuntimeState::Exited,
                env: ContainerMetadata::new("llama2", "7b", 11437).to_env(),
                ports: HashMap::new(),
            })
        });

        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(connector_for(runtime))).await;
        assert_eq!(orchestrator.get_container_port("llama2", "7b").await, None);
        assert_eq!(orchestrator.last_error(), None);
    }

    #[tokio::test]
    async fn test_invalid_names_are_rejected_before_the_daemon() {
        let runtime = MockContainerRuntime::new();
        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(connector_for(runtime))).await;

        let model = AiModel::new(3, "llama2");
        let version = ModelVersion::new("7b instruct");
        assert_eq!(orchestrator.run_container(&model, &version).await, None);
        assert_eq!(orchestrator.last_error(), Some(ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn test_identity_keys_cannot_be_rewritten() {
        let runtime = MockContainerRuntime::new();
        let orchestrator = Orchestrator::new(DockConfig::default(), Arc::new(connector_for(runtime))).await;

        for key in [PORT_KEY, MODEL_KEY, PARAMETERS_KEY] {
            let err = orchestrator
                .try_set_container_env("llama2_7b", key, "13b")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{}", key);
        }
    }
}
