//! Shared bridge network for engine containers.

use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerRuntime, NetworkRecord};

pub const BRIDGE_DRIVER: &str = "bridge";

/// Look a network up by name. `Ok(None)` when the daemon does not know it.
pub async fn get_network(
    runtime: &dyn ContainerRuntime,
    name: &str,
) -> RuntimeResult<Option<NetworkRecord>> {
    match runtime.inspect_network(name).await {
        Ok(network) => {
            debug!("Found network {} ({})", name, network.driver);
            Ok(Some(network))
        }
        Err(err) if err.is_not_found() => {
            debug!("Network {} does not exist", name);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Get-or-create a bridge network.
///
/// When another creator wins the race the daemon answers with a conflict, and
/// the network it created is returned instead.
pub async fn ensure_network(
    runtime: &dyn ContainerRuntime,
    name: &str,
) -> RuntimeResult<NetworkRecord> {
    validate_network_name(name)?;

    if let Some(network) = get_network(runtime, name).await? {
        if network.driver != BRIDGE_DRIVER {
            warn!(
                "⚠️  Network {} uses driver '{}', expected '{}'",
                name, network.driver, BRIDGE_DRIVER
            );
        }
        return Ok(network);
    }

    info!("🌉 Creating bridge network: {}", name);
    match runtime.create_network(name, BRIDGE_DRIVER).await {
        Ok(network) => {
            info!("✅ Bridge network created: {}", name);
            Ok(network)
        }
        Err(err) if err.is_conflict() => {
            debug!("Network {} created concurrently, reusing it", name);
            runtime.inspect_network(name).await
        }
        Err(err) => Err(err),
    }
}

fn validate_network_name(name: &str) -> RuntimeResult<()> {
    if matches!(name, "" | "default" | "bridge" | "host" | "none") {
        return Err(RuntimeError::InvalidRequest {
            reason: format!("'{}' cannot be used as the engine network", name),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Resource;
    use crate::runtime::MockContainerRuntime;
    use crate::runtime::memory::InMemoryRuntime;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_ensure_creates_once() {
        let runtime = InMemoryRuntime::new();

        let first = ensure_network(&runtime, "chatbot_network").await.unwrap();
        let second = ensure_network(&runtime, "chatbot_network").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.driver, "bridge");
        assert_eq!(runtime.call_count("create_network"), 1);
    }

    #[tokio::test]
    async fn test_get_missing_network_is_none() {
        let runtime = InMemoryRuntime::new();
        assert_eq!(get_network(&runtime, "chatbot_network").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_daemon_error_is_not_absence() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_on("inspect_network");
        assert!(get_network(&runtime, "chatbot_network").await.is_err());
    }

    #[tokio::test]
    async fn test_lost_create_race_reuses_winner() {
        let mut mock = MockContainerRuntime::new();
        let mut inspections = 0;
        mock.expect_inspect_network()
            .with(eq("chatbot_network"))
            .times(2)
            .returning(move |name| {
                inspections += 1;
                if inspections == 1 {
                    Err(RuntimeError::not_found(Resource::Network, name))
                } else {
                    Ok(NetworkRecord {
                        id: "winner".to_string(),
                        name: name.to_string(),
                        driver: "bridge".to_string(),
                    })
                }
            });
        mock.expect_create_network().times(1).returning(|name, _| {
            Err(RuntimeError::Conflict {
                resource: Resource::Network,
                name: name.to_string(),
            })
        });

        let network = ensure_network(&mock, "chatbot_network").await.unwrap();
        assert_eq!(network.id, "winner");
    }

    #[tokio::test]
    async fn test_system_networks_rejected() {
        let runtime = InMemoryRuntime::new();
        let err = ensure_network(&runtime, "host").await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidRequest { .. }));
        assert_eq!(runtime.call_count("create_network"), 0);
    }
}
