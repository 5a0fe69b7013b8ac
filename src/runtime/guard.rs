//! Timeout and retry policy around daemon calls.
//!
//! Every call is bounded; expiry is reported as `RuntimeError::Timeout`. Reads
//! are retried on transient failures, writes never are.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{
    ContainerRecord, ContainerRuntime, ContainerSpec, ImageRecord, NetworkRecord, ProcessTable,
};
use crate::config::DaemonConfig;
use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub pull_timeout: Duration,
    pub read_retries: u32,
    pub retry_backoff: Duration,
}

impl From<&DaemonConfig> for CallPolicy {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            timeout: config.timeout(),
            pull_timeout: config.pull_timeout(),
            read_retries: config.read_retries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

/// Decorates a runtime with [`CallPolicy`]
pub struct GuardedRuntime {
    inner: Arc<dyn ContainerRuntime>,
    policy: CallPolicy,
}

impl GuardedRuntime {
    pub fn new(inner: Arc<dyn ContainerRuntime>, policy: CallPolicy) -> Self {
        Self { inner, policy }
    }

    async fn bounded<T, F>(&self, operation: &str, limit: Duration, call: F) -> RuntimeResult<T>
    where
        F: Future<Output = RuntimeResult<T>>,
    {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout {
                operation: operation.to_string(),
                after: limit,
            }),
        }
    }

    async fn write<T, F>(&self, operation: &str, call: F) -> RuntimeResult<T>
    where
        F: Future<Output = RuntimeResult<T>>,
    {
        self.bounded(operation, self.policy.timeout, call).await
    }

    async fn read<T, F, Fut>(&self, operation: &str, call: F) -> RuntimeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RuntimeResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.bounded(operation, self.policy.timeout, call()).await {
                Err(err) if err.is_transient() && attempt < self.policy.read_retries => {
                    attempt += 1;
                    warn!(
                        "🔁 {} failed ({}), retry {}/{}",
                        operation, err, attempt, self.policy.read_retries
                    );
                    tokio::time::sleep(self.policy.retry_backoff * attempt).await;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for GuardedRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.read("ping", || self.inner.ping()).await
    }

    async fn inspect_image(&self, image: &str) -> RuntimeResult<ImageRecord> {
        self.read("inspect_image", || self.inner.inspect_image(image))
            .await
    }

    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<ImageRecord> {
        self.bounded(
            "pull_image",
            self.policy.pull_timeout,
            self.inner.pull_image(image, tag),
        )
        .await
    }

    async fn list_containers(&self, ancestor: &str) -> RuntimeResult<Vec<ContainerRecord>> {
        self.read("list_containers", || self.inner.list_containers(ancestor))
            .await
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<ContainerRecord> {
        self.read("inspect_container", || self.inner.inspect_container(name))
            .await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerRecord> {
        self.write("create_container", self.inner.create_container(spec))
            .await
    }

    async fn start_container(&self, name: &str) -> RuntimeResult<()> {
        self.write("start_container", self.inner.start_container(name))
            .await
    }

    async fn stop_container(&self, name: &str) -> RuntimeResult<()> {
        self.write("stop_container", self.inner.stop_container(name))
            .await
    }

    async fn remove_container(&self, name: &str) -> RuntimeResult<()> {
        self.write("remove_container", self.inner.remove_container(name))
            .await
    }

    async fn top(&self, name: &str) -> RuntimeResult<ProcessTable> {
        self.read("top", || self.inner.top(name)).await
    }

    async fn exec_detached(&self, name: &str, cmd: Vec<String>) -> RuntimeResult<()> {
        self.write("exec", self.inner.exec_detached(name, cmd)).await
    }

    async fn inspect_network(&self, name: &str) -> RuntimeResult<NetworkRecord> {
        self.read("inspect_network", || self.inner.inspect_network(name))
            .await
    }

    async fn create_network(&self, name: &str, driver: &str) -> RuntimeResult<NetworkRecord> {
        self.write("create_network", self.inner.create_network(name, driver))
            .await
    }
}
