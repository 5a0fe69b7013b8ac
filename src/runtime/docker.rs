//! Docker Engine implementation of the runtime seam.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, ContainerSummary, DeviceRequest,
    HostConfig, PortBinding,
};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::TryStreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::guard::{CallPolicy, GuardedRuntime};
use super::{
    ContainerRecord, ContainerRuntime, ContainerSpec, ImageRecord, NetworkRecord, ProcessTable,
    RuntimeConnector, RuntimeState, matches_reference,
};
use crate::config::DaemonConfig;
use crate::error::{Resource, RuntimeError, RuntimeResult};

/// Stop grace period before the daemon kills the engine
const STOP_TIMEOUT_SECS: i64 = 10;

pub struct DockerRuntime {
    docker: Docker,
    /// Client-side request timeout, reported when the daemon does not answer
    timeout: Duration,
}

impl DockerRuntime {
    pub fn new(docker: Docker, timeout: Duration) -> Self {
        Self { docker, timeout }
    }

    /// Connect without verifying the daemon is reachable.
    pub fn connect(config: &DaemonConfig) -> RuntimeResult<Self> {
        let timeout = config.timeout_secs;
        let docker = match config.host.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_socket(host, timeout, API_DEFAULT_VERSION)
            }
            Some(host) => {
                let address = host.replacen("tcp://", "http://", 1);
                Docker::connect_with_http(&address, timeout, API_DEFAULT_VERSION)
            }
        }
        .map_err(|err| RuntimeError::ConnectionUnavailable {
            reason: err.to_string(),
        })?;

        Ok(Self::new(docker.with_timeout(config.timeout()), config.timeout()))
    }

    fn error(
        &self,
        operation: &str,
        resource: Resource,
        name: &str,
        err: BollardError,
    ) -> RuntimeError {
        map_error(self.timeout, operation, resource, name, err)
    }

    async fn summaries(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        self.docker
            .list_containers(Some(options))
            .await
            .map_err(|err| self.error("list_containers", Resource::Image, "containers", err))
    }
}

fn map_error(
    timeout: Duration,
    operation: &str,
    resource: Resource,
    name: &str,
    err: BollardError,
) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::not_found(resource, name),
        BollardError::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeError::Conflict {
            resource,
            name: name.to_string(),
        },
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::daemon(operation, format!("{} {}", status_code, message)),
        BollardError::RequestTimeoutError => RuntimeError::Timeout {
            operation: operation.to_string(),
            after: timeout,
        },
        other => RuntimeError::daemon(operation, other.to_string()),
    }
}

fn state_of(response: &ContainerInspectResponse) -> RuntimeState {
    let status = response
        .state
        .as_ref()
        .and_then(|state| state.status)
        .unwrap_or(ContainerStateStatusEnum::EMPTY);

    match status {
        ContainerStateStatusEnum::CREATED => RuntimeState::Created,
        ContainerStateStatusEnum::RUNNING => RuntimeState::Running,
        ContainerStateStatusEnum::PAUSED => RuntimeState::Paused,
        ContainerStateStatusEnum::RESTARTING => RuntimeState::Restarting,
        ContainerStateStatusEnum::REMOVING => RuntimeState::Removing,
        ContainerStateStatusEnum::EXITED => RuntimeState::Exited,
        ContainerStateStatusEnum::DEAD => RuntimeState::Dead,
        _ => RuntimeState::Unknown,
    }
}

fn record_of(response: ContainerInspectResponse) -> ContainerRecord {
    let state = state_of(&response);

    // Live bindings while running; the configured ones otherwise.
    let live = response
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.clone())
        .unwrap_or_default();
    let configured = response
        .host_config
        .as_ref()
        .and_then(|host| host.port_bindings.clone())
        .unwrap_or_default();

    let mut ports = HashMap::new();
    for (key, bindings) in configured.into_iter().chain(live) {
        let host_port = bindings
            .unwrap_or_default()
            .into_iter()
            .find_map(|binding| binding.host_port.filter(|p| !p.is_empty()));
        if let Some(host_port) = host_port {
            ports.insert(key, host_port);
        }
    }

    let config = response.config.unwrap_or_default();

    ContainerRecord {
        id: response.id.unwrap_or_default(),
        name: response
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        state,
        env: config.env.unwrap_or_default(),
        ports,
    }
}

/// Creation parameters for an engine container: the published engine port,
/// the shared network, the metadata environment and, when asked, every GPU.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let device_requests = spec.gpus.then(|| {
        vec![DeviceRequest {
            count: Some(-1),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]
    });

    let port_bindings = HashMap::from([(
        spec.container_port.clone(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(spec.host_port.to_string()),
        }]),
    )]);

    let host_config = HostConfig {
        device_requests,
        network_mode: Some(spec.network.clone()),
        port_bindings: Some(port_bindings),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        exposed_ports: Some(HashMap::from([(spec.container_port.clone(), HashMap::new())])),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Containers to inspect for a listing by image reference.
///
/// The ancestor filter resolves the reference to the image it names now, so
/// after a newer tag is pulled, containers built on the previous image only
/// show up under an image ID. Those are kept as candidates and matched on
/// their configured reference after inspection.
fn listing_candidates(
    summaries: Vec<ContainerSummary>,
    descendants: &HashSet<String>,
    reference: &str,
) -> Vec<String> {
    summaries
        .into_iter()
        .filter_map(|summary| {
            let id = summary.id?;
            let image = summary.image.unwrap_or_default();
            let candidate = descendants.contains(&id)
                || image.starts_with("sha256:")
                || matches_reference(&image, reference);
            candidate.then_some(id)
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|err| RuntimeError::ConnectionUnavailable {
                reason: err.to_string(),
            })
    }

    async fn inspect_image(&self, image: &str) -> RuntimeResult<ImageRecord> {
        let inspect = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|err| self.error("inspect_image", Resource::Image, image, err))?;

        Ok(ImageRecord {
            id: inspect.id.unwrap_or_default(),
            tags: inspect.repo_tags.unwrap_or_default(),
        })
    }

    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<ImageRecord> {
        info!("⬇️  Pulling image {}:{}", image, tag);
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream
            .try_next()
            .await
            .map_err(|err| self.error("pull_image", Resource::Image, image, err))?
        {
            if let Some(status) = progress.status {
                debug!("pull {}:{}: {}", image, tag, status);
            }
        }

        self.inspect_image(&format!("{}:{}", image, tag)).await
    }

    async fn list_containers(&self, ancestor: &str) -> RuntimeResult<Vec<ContainerRecord>> {
        let descendants: HashSet<String> = self
            .summaries(HashMap::from([(
                "ancestor".to_string(),
                vec![ancestor.to_string()],
            )]))
            .await?
            .into_iter()
            .filter_map(|summary| summary.id)
            .collect();
        let everything = self.summaries(HashMap::new()).await?;

        // The summary carries no environment, so each container is inspected.
        let mut records = Vec::new();
        for id in listing_candidates(everything, &descendants, ancestor) {
            match self.inspect_container(&id).await {
                Ok(record) if descendants.contains(&record.id) => records.push(record),
                Ok(record) if matches_reference(&record.image, ancestor) => records.push(record),
                Ok(_) => {}
                // Removed between list and inspect.
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<ContainerRecord> {
        self.docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map(record_of)
            .map_err(|err| self.error("inspect_container", Resource::Container, name, err))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerRecord> {
        let config = container_config(spec);

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|err| self.error("create_container", Resource::Container, &spec.name, err))?;

        self.inspect_container(&spec.name).await
    }

    async fn start_container(&self, name: &str) -> RuntimeResult<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already started.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(self.error("start_container", Resource::Container, name, err)),
        }
    }

    async fn stop_container(&self, name: &str) -> RuntimeResult<()> {
        match self
            .docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(self.error("stop_container", Resource::Container, name, err)),
        }
    }

    async fn remove_container(&self, name: &str) -> RuntimeResult<()> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|err| self.error("remove_container", Resource::Container, name, err))
    }

    async fn top(&self, name: &str) -> RuntimeResult<ProcessTable> {
        let top = self
            .docker
            .top_processes::<String>(name, None)
            .await
            .map_err(|err| self.error("top", Resource::Container, name, err))?;

        Ok(ProcessTable {
            titles: top.titles.unwrap_or_default(),
            processes: top.processes.unwrap_or_default(),
        })
    }

    async fn exec_detached(&self, name: &str, cmd: Vec<String>) -> RuntimeResult<()> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| self.error("exec", Resource::Container, name, err))?;

        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map(|_| ())
            .map_err(|err| self.error("exec", Resource::Container, name, err))
    }

    async fn inspect_network(&self, name: &str) -> RuntimeResult<NetworkRecord> {
        let network = self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(|err| self.error("inspect_network", Resource::Network, name, err))?;

        Ok(NetworkRecord {
            id: network.id.unwrap_or_default(),
            name: network.name.unwrap_or_else(|| name.to_string()),
            driver: network.driver.unwrap_or_default(),
        })
    }

    async fn create_network(&self, name: &str, driver: &str) -> RuntimeResult<NetworkRecord> {
        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: driver.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|err| self.error("create_network", Resource::Network, name, err))?;

        self.inspect_network(name).await
    }
}

/// Connects to the Docker daemon and wraps the handle in the call policy
pub struct DockerConnector {
    config: DaemonConfig,
}

impl DockerConnector {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RuntimeConnector for DockerConnector {
    async fn connect(&self) -> RuntimeResult<Arc<dyn ContainerRuntime>> {
        let raw: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect(&self.config)?);
        let guarded = GuardedRuntime::new(raw, CallPolicy::from(&self.config));

        guarded
            .ping()
            .await
            .map_err(|err| RuntimeError::ConnectionUnavailable {
                reason: err.to_string(),
            })?;

        info!("🐳 Connected to Docker daemon");
        Ok(Arc::new(guarded))
    }
}
