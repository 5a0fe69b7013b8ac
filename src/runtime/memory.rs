//! In-process container runtime with Docker-like semantics.
//!
//! Names are unique, a host port can be bound by one running container at a
//! time, containers are filtered by image ancestry and every running container
//! shows the engine's `ollama serve` process plus whatever was exec'd into it.
//! Individual operations can be made to fail, and the connector can be taken
//! offline.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ContainerRecord, ContainerRuntime, ContainerSpec, ImageRecord, NetworkRecord, ProcessTable,
    RuntimeConnector, RuntimeState, matches_reference,
};
use crate::error::{Resource, RuntimeError, RuntimeResult};

const ENGINE_PROCESS: &str = "/bin/ollama serve";

#[derive(Debug, Clone)]
struct MemoryContainer {
    record: ContainerRecord,
    host_port: u16,
    network: String,
    gpus: bool,
    execs: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    images: HashSet<String>,
    containers: BTreeMap<String, MemoryContainer>,
    networks: HashMap<String, NetworkRecord>,
    failing: HashSet<String>,
    failing_once: HashSet<String>,
    calls: Vec<String>,
    next_id: u64,
}

impl MemoryState {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:012x}", prefix, self.next_id)
    }

    fn container(&mut self, name: &str) -> RuntimeResult<&mut MemoryContainer> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::not_found(Resource::Container, name))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<MemoryState>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime that already holds `image:tag`.
    pub fn with_image(image: &str, tag: &str) -> Self {
        let runtime = Self::new();
        runtime.lock().images.insert(format!("{}:{}", image, tag));
        runtime
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every later call of `operation` fail with a daemon error.
    pub fn fail_on(&self, operation: &str) {
        self.lock().failing.insert(operation.to_string());
    }

    /// Make only the next call of `operation` fail.
    pub fn fail_once(&self, operation: &str) {
        self.lock().failing_once.insert(operation.to_string());
    }

    pub fn recover(&self, operation: &str) {
        self.lock().failing.remove(operation);
    }

    /// Operations invoked so far, in order, e.g. `create_container:llama2_7b`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split(':').next() == Some(operation))
            .count()
    }

    /// Finish every command exec'd into `name`, e.g. a completed model pull.
    pub fn complete_execs(&self, name: &str) {
        if let Some(container) = self.lock().containers.get_mut(name) {
            container.execs.clear();
        }
    }

    pub fn exec_history(&self, name: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| c.strip_prefix("exec:"))
            .filter_map(|rest| rest.split_once(':'))
            .filter(|(target, _)| *target == name)
            .map(|(_, cmd)| cmd.to_string())
            .collect()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.lock().networks.keys().cloned().collect()
    }

    pub fn network_of(&self, name: &str) -> Option<String> {
        self.lock().containers.get(name).map(|c| c.network.clone())
    }

    /// Whether `name` was created with access to all GPUs.
    pub fn gpus_of(&self, name: &str) -> Option<bool> {
        self.lock().containers.get(name).map(|c| c.gpus)
    }

    /// Simulate a container created behind the orchestrator's back.
    pub fn insert_container(&self, spec: &ContainerSpec, state: RuntimeState) {
        let mut guard = self.lock();
        let id = guard.fresh_id("c");
        guard.containers.insert(
            spec.name.clone(),
            MemoryContainer {
                record: record_from_spec(id, spec, state),
                host_port: spec.host_port,
                network: spec.network.clone(),
                gpus: spec.gpus,
                execs: Vec::new(),
            },
        );
    }

    fn enter(&self, operation: &str, target: &str) -> RuntimeResult<MutexGuard<'_, MemoryState>> {
        let mut guard = self.lock();
        guard.calls.push(format!("{}:{}", operation, target));
        if guard.failing.contains(operation) || guard.failing_once.remove(operation) {
            return Err(RuntimeError::daemon(operation, "injected failure"));
        }
        Ok(guard)
    }
}

fn record_from_spec(id: String, spec: &ContainerSpec, state: RuntimeState) -> ContainerRecord {
    ContainerRecord {
        id,
        name: spec.name.clone(),
        image: spec.image.clone(),
        state,
        env: spec.env.clone(),
        ports: HashMap::from([(spec.container_port.clone(), spec.host_port.to_string())]),
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.enter("ping", "daemon").map(|_| ())
    }

    async fn inspect_image(&self, image: &str) -> RuntimeResult<ImageRecord> {
        let guard = self.enter("inspect_image", image)?;
        guard
            .images
            .iter()
            .find(|known| matches_reference(known, image))
            .map(|known| ImageRecord {
                id: format!("sha256:{}", known.len()),
                tags: vec![known.clone()],
            })
            .ok_or_else(|| RuntimeError::not_found(Resource::Image, image))
    }

    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<ImageRecord> {
        let reference = format!("{}:{}", image, tag);
        let mut guard = self.enter("pull_image", &reference)?;
        guard.images.insert(reference.clone());
        Ok(ImageRecord {
            id: format!("sha256:{}", reference.len()),
            tags: vec![reference],
        })
    }

    async fn list_containers(&self, ancestor: &str) -> RuntimeResult<Vec<ContainerRecord>> {
        let guard = self.enter("list_containers", ancestor)?;
        Ok(guard
            .containers
            .values()
            .filter(|c| matches_reference(&c.record.image, ancestor))
            .map(|c| c.record.clone())
            .collect())
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<ContainerRecord> {
        let mut guard = self.enter("inspect_container", name)?;
        guard.container(name).map(|c| c.record.clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerRecord> {
        let mut guard = self.enter("create_container", &spec.name)?;
        if guard.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Conflict {
                resource: Resource::Container,
                name: spec.name.clone(),
            });
        }
        if !guard.images.iter().any(|i| matches_reference(i, &spec.image)) {
            return Err(RuntimeError::not_found(Resource::Image, spec.image.clone()));
        }
        if !guard.networks.contains_key(&spec.network) {
            return Err(RuntimeError::not_found(Resource::Network, spec.network.clone()));
        }

        let id = guard.fresh_id("c");
        let record = record_from_spec(id, spec, RuntimeState::Created);
        guard.containers.insert(
            spec.name.clone(),
            MemoryContainer {
                record: record.clone(),
                host_port: spec.host_port,
                network: spec.network.clone(),
                gpus: spec.gpus,
                execs: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn start_container(&self, name: &str) -> RuntimeResult<()> {
        let mut guard = self.enter("start_container", name)?;
        let port = guard.container(name)?.host_port;

        let holder = guard
            .containers
            .values()
            .find(|c| c.record.name != name && c.host_port == port && c.record.state.holds_port())
            .map(|c| c.record.name.clone());
        if let Some(holder) = holder {
            return Err(RuntimeError::daemon(
                "start_container",
                format!("port {} is already allocated by {}", port, holder),
            ));
        }

        guard.container(name)?.record.state = RuntimeState::Running;
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> RuntimeResult<()> {
        let mut guard = self.enter("stop_container", name)?;
        let container = guard.container(name)?;
        if container.record.state.holds_port() {
            container.record.state = RuntimeState::Exited;
        }
        container.execs.clear();
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> RuntimeResult<()> {
        let mut guard = self.enter("remove_container", name)?;
        guard
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::not_found(Resource::Container, name))
    }

    async fn top(&self, name: &str) -> RuntimeResult<ProcessTable> {
        let mut guard = self.enter("top", name)?;
        let container = guard.container(name)?;
        if !container.record.is_running() {
            return Err(RuntimeError::daemon(
                "top",
                format!("container {} is not running", name),
            ));
        }

        let processes = std::iter::once(ENGINE_PROCESS.to_string())
            .chain(container.execs.iter().cloned())
            .enumerate()
            .map(|(pid, cmd)| vec!["root".to_string(), (pid + 1).to_string(), cmd])
            .collect();

        Ok(ProcessTable {
            titles: vec!["UID".to_string(), "PID".to_string(), "CMD".to_string()],
            processes,
        })
    }

    async fn exec_detached(&self, name: &str, cmd: Vec<String>) -> RuntimeResult<()> {
        let line = cmd.join(" ");
        let mut guard = self.enter("exec", &format!("{}:{}", name, line))?;
        let container = guard.container(name)?;
        if !container.record.is_running() {
            return Err(RuntimeError::Conflict {
                resource: Resource::Container,
                name: format!("{} is not running", name),
            });
        }
        container.execs.push(line);
        Ok(())
    }

    async fn inspect_network(&self, name: &str) -> RuntimeResult<NetworkRecord> {
        let guard = self.enter("inspect_network", name)?;
        guard
            .networks
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(Resource::Network, name))
    }

    async fn create_network(&self, name: &str, driver: &str) -> RuntimeResult<NetworkRecord> {
        let mut guard = self.enter("create_network", name)?;
        if guard.networks.contains_key(name) {
            return Err(RuntimeError::Conflict {
                resource: Resource::Network,
                name: name.to_string(),
            });
        }
        let network = NetworkRecord {
            id: guard.fresh_id("n"),
            name: name.to_string(),
            driver: driver.to_string(),
        };
        guard.networks.insert(name.to_string(), network.clone());
        Ok(network)
    }
}

/// Connector handing out a shared [`InMemoryRuntime`]
pub struct MemoryConnector {
    runtime: Arc<InMemoryRuntime>,
    online: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(runtime: Arc<InMemoryRuntime>) -> Self {
        Self {
            runtime,
            online: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeConnector for MemoryConnector {
    async fn connect(&self) -> RuntimeResult<Arc<dyn ContainerRuntime>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(self.runtime.clone())
        } else {
            Err(RuntimeError::ConnectionUnavailable {
                reason: "in-memory daemon offline".to_string(),
            })
        }
    }
}
