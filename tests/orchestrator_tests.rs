use llmdock::api::{InMemoryRuntime, MemoryConnector, RuntimeState};
use llmdock::runtime::ContainerSpec;
use llmdock::{AiModel, ContainerStatus, DockConfig, ErrorKind, ModelVersion, Orchestrator};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn test_config() -> DockConfig {
    let mut config = DockConfig::default();
    config.engine.settle_secs = 0;
    config.daemon.retry_backoff_ms = 1;
    config
}

struct Harness {
    runtime: Arc<InMemoryRuntime>,
    connector: Arc<MemoryConnector>,
    orchestrator: Orchestrator,
}

async fn harness() -> Harness {
    let runtime = Arc::new(InMemoryRuntime::with_image("ollama/ollama", "latest"));
    let connector = Arc::new(MemoryConnector::new(runtime.clone()));
    let orchestrator = Orchestrator::new(test_config(), connector.clone()).await;
    Harness {
        runtime,
        connector,
        orchestrator,
    }
}

fn llama2() -> AiModel {
    AiModel::new(3, "llama2").with_version("7b").with_version("13b")
}

fn version(parameters: &str) -> ModelVersion {
    ModelVersion::new(parameters)
}

#[tokio::test]
async fn test_first_run_creates_bound_container() {
    let h = harness().await;

    let record = h
        .orchestrator
        .run_container(&llama2(), &version("7b"))
        .await
        .expect("container should start");

    assert_eq!(record.name, "llama2_7b");
    assert_eq!(record.state, RuntimeState::Running);
    assert_eq!(record.image, "ollama/ollama:latest");
    assert_eq!(record.env, vec!["model=llama2", "parameters=7b", "port=11437"]);
    assert_eq!(record.host_port("11434/tcp"), Some("11437"));
    assert_eq!(h.runtime.network_of("llama2_7b").as_deref(), Some("chatbot_network"));
    assert_eq!(h.runtime.exec_history("llama2_7b"), vec!["ollama pull llama2:7b"]);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = harness().await;
    let model = llama2();

    let first = h.orchestrator.run_container(&model, &version("7b")).await.unwrap();
    let second = h.orchestrator.run_container(&model, &version("7b")).await.unwrap();

    assert_eq!(first.name, second.name);
    assert_eq!(first.id, second.id);
    assert_eq!(second.state, RuntimeState::Running);
    assert_eq!(h.runtime.call_count("create_container"), 1);
    assert_eq!(h.runtime.call_count("exec"), 1);
    // Its own reconciliation never stops it.
    assert_eq!(h.runtime.call_count("stop_container"), 0);
}

#[tokio::test]
async fn test_new_version_evicts_port_holder() {
    let h = harness().await;
    let model = llama2();

    h.orchestrator.run_container(&model, &version("7b")).await.unwrap();
    let bigger = h.orchestrator.run_container(&model, &version("13b")).await.unwrap();

    assert_eq!(bigger.name, "llama2_13b");
    assert_eq!(bigger.state, RuntimeState::Running);
    assert_eq!(bigger.host_port("11434/tcp"), Some("11437"));

    let evicted = h.orchestrator.get_container("llama2_7b").await.unwrap();
    assert_eq!(evicted.state, RuntimeState::Exited);

    let listed = h.orchestrator.list_available().await;
    let on_port: Vec<_> = listed
        .iter()
        .filter(|c| c.port.as_deref() == Some("11437"))
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(on_port, vec!["llama2_13b"]);
}

#[tokio::test]
async fn test_rerun_of_evicted_version_takes_port_back() {
    let h = harness().await;
    let model = llama2();

    h.orchestrator.run_container(&model, &version("7b")).await.unwrap();
    h.orchestrator.run_container(&model, &version("13b")).await.unwrap();
    let back = h.orchestrator.run_container(&model, &version("7b")).await.unwrap();

    assert_eq!(back.state, RuntimeState::Running);
    assert_eq!(h.runtime.call_count("create_container"), 2);
    let thirteen = h.orchestrator.get_container("llama2_13b").await.unwrap();
    assert_eq!(thirteen.state, RuntimeState::Exited);
}

#[tokio::test]
async fn test_rerun_after_eviction_pulls_model_again() {
    let h = harness().await;
    let model = llama2();

    h.orchestrator.run_container(&model, &version("7b")).await.unwrap();
    // Evicted while its pull is still in flight.
    h.orchestrator.run_container(&model, &version("13b")).await.unwrap();
    h.orchestrator.run_container(&model, &version("7b")).await.unwrap();

    assert_eq!(
        h.runtime.exec_history("llama2_7b"),
        vec!["ollama pull llama2:7b", "ollama pull llama2:7b"]
    );
    let seven = h
        .orchestrator
        .list_available()
        .await
        .into_iter()
        .find(|c| c.name == "llama2_7b")
        .unwrap();
    assert_eq!(seven.status, ContainerStatus::PullingModel);

    h.runtime.complete_execs("llama2_7b");
    let listed = h.orchestrator.list_available().await;
    let seven = listed.iter().find(|c| c.name == "llama2_7b").unwrap();
    assert_eq!(seven.status, ContainerStatus::Running);
}

#[tokio::test]
async fn test_failed_pull_on_rerun_keeps_container_stopped() {
    let h = harness().await;
    let model = llama2();

    h.orchestrator.run_container(&model, &version("7b")).await.unwrap();
    h.orchestrator.run_container(&model, &version("13b")).await.unwrap();
    h.runtime.fail_on("exec");

    assert_eq!(h.orchestrator.run_container(&model, &version("7b")).await, None);
    assert_eq!(h.orchestrator.last_error(), Some(ErrorKind::PartialFailure));

    let seven = h.orchestrator.get_container("llama2_7b").await.unwrap();
    assert_eq!(seven.state, RuntimeState::Exited);
    assert_eq!(h.orchestrator.get_container_port("llama2", "7b").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_model_pull_waits_for_settle_delay() {
    let mut config = test_config();
    config.engine.settle_secs = 2;
    let runtime = Arc::new(InMemoryRuntime::with_image("ollama/ollama", "latest"));
    let orchestrator = Orchestrator::new(config, Arc::new(MemoryConnector::new(runtime.clone()))).await;

    let started = tokio::time::Instant::now();
    orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    assert!(started.elapsed() >= std::time::Duration::from_secs(2));

    let calls = runtime.calls();
    let start = calls.iter().position(|c| c == "start_container:llama2_7b").unwrap();
    let pull = calls.iter().position(|c| c.starts_with("exec:llama2_7b:")).unwrap();
    assert!(start < pull, "{:?}", calls);
}

#[tokio::test]
async fn test_gpu_request_follows_config() {
    let h = harness().await;
    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    assert_eq!(h.runtime.gpus_of("llama2_7b"), Some(true));

    let mut config = test_config();
    config.engine.gpus = false;
    let runtime = Arc::new(InMemoryRuntime::with_image("ollama/ollama", "latest"));
    let orchestrator = Orchestrator::new(config, Arc::new(MemoryConnector::new(runtime.clone()))).await;
    orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    assert_eq!(runtime.gpus_of("llama2_7b"), Some(false));
}

#[tokio::test]
async fn test_other_ports_are_left_alone() {
    let h = harness().await;
    let mistral = AiModel::new(4, "mistral").with_version("7b");

    h.orchestrator.run_container(&mistral, &version("7b")).await.unwrap();
    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    h.orchestrator.run_container(&llama2(), &version("13b")).await.unwrap();

    let mistral_record = h.orchestrator.get_container("mistral_7b").await.unwrap();
    assert_eq!(mistral_record.state, RuntimeState::Running);
    assert_eq!(h.runtime.call_count("create_network"), 1);
}

#[tokio::test]
async fn test_port_reported_only_while_running() {
    let h = harness().await;
    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();

    assert_eq!(
        h.orchestrator.get_container_port("llama2", "7b").await.as_deref(),
        Some("11437")
    );

    assert!(h.orchestrator.stop_container("llama2_7b").await);
    assert_eq!(h.orchestrator.get_container_port("llama2", "7b").await, None);
    assert_eq!(h.orchestrator.get_container_port("llama2", "70b").await, None);
    assert_eq!(h.orchestrator.last_error(), None);
}

#[tokio::test]
async fn test_pulling_model_status_follows_pull_process() {
    let h = harness().await;
    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();

    let listed = h.orchestrator.list_available().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, ContainerStatus::PullingModel);
    assert_eq!(listed[0].port.as_deref(), Some("11437"));
    assert_eq!(listed[0].environment.model.as_deref(), Some("llama2"));
    assert_eq!(listed[0].environment.parameters.as_deref(), Some("7b"));

    h.runtime.complete_execs("llama2_7b");
    let listed = h.orchestrator.list_available().await;
    assert_eq!(listed[0].status, ContainerStatus::Running);
    assert!(listed[0].status.is_ready());

    h.orchestrator.stop_container("llama2_7b").await;
    let listed = h.orchestrator.list_available().await;
    assert_eq!(listed[0].status, ContainerStatus::Exited);
    assert_eq!(listed[0].port, None);
}

#[tokio::test]
async fn test_listing_ignores_foreign_images() {
    let h = harness().await;
    h.runtime.insert_container(
        &ContainerSpec {
            name: "postgres".to_string(),
            image: "postgres:16".to_string(),
            network: "bridge".to_string(),
            container_port: "5432/tcp".to_string(),
            host_port: 5432,
            gpus: false,
            env: vec![],
        },
        RuntimeState::Running,
    );
    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();

    let names: Vec<_> = h
        .orchestrator
        .list_available()
        .await
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["llama2_7b"]);
}

#[tokio::test]
async fn test_stop_and_remove_of_missing_container_are_noops() {
    let h = harness().await;

    assert!(h.orchestrator.stop_container("nonexistent").await);
    assert!(h.orchestrator.remove_container("nonexistent").await);
    assert_ok!(h.orchestrator.try_stop_container("nonexistent").await);
    assert_eq!(h.orchestrator.last_error(), None);
}

#[tokio::test]
async fn test_remove_stops_first() {
    let h = harness().await;
    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();

    assert!(h.orchestrator.remove_container("llama2_7b").await);
    assert_eq!(h.orchestrator.get_container("llama2_7b").await, None);

    let calls = h.runtime.calls();
    let stop = calls.iter().position(|c| c == "stop_container:llama2_7b");
    let remove = calls.iter().position(|c| c == "remove_container:llama2_7b");
    assert!(stop.is_some() && remove.is_some() && stop < remove);
}

#[tokio::test]
async fn test_disconnected_pull_never_reaches_daemon() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let connector = Arc::new(MemoryConnector::new(runtime.clone()));
    connector.set_online(false);

    let orchestrator = Orchestrator::new(test_config(), connector.clone()).await;
    assert!(!orchestrator.is_connected());

    assert_eq!(orchestrator.pull_image().await, None);
    assert_eq!(orchestrator.last_error(), Some(ErrorKind::ConnectionUnavailable));
    assert_eq!(runtime.call_count("pull_image"), 0);
    // Construction plus exactly one reconnect.
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test]
async fn test_reconnects_when_daemon_returns() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let connector = Arc::new(MemoryConnector::new(runtime.clone()));
    connector.set_online(false);
    let orchestrator = Orchestrator::new(test_config(), connector.clone()).await;

    connector.set_online(true);
    assert!(!orchestrator.is_image_pulled().await);
    assert!(orchestrator.is_connected());

    let image = orchestrator.pull_image().await.unwrap();
    assert_eq!(image.tags, vec!["ollama/ollama:latest"]);
    assert!(orchestrator.is_image_pulled().await);
}

#[tokio::test]
async fn test_missing_image_fails_run() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let connector = Arc::new(MemoryConnector::new(runtime.clone()));
    let orchestrator = Orchestrator::new(test_config(), connector).await;

    assert_eq!(orchestrator.run_container(&llama2(), &version("7b")).await, None);
    assert_eq!(orchestrator.last_error(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_start_failure_retries_then_cleans_up() {
    let h = harness().await;
    h.runtime.fail_on("start_container");

    let result = h.orchestrator.try_run_container(&llama2(), &version("7b")).await;
    let err = assert_err!(result);
    assert_eq!(err.kind(), ErrorKind::PartialFailure);
    assert!(err.to_string().contains("start"));

    assert_eq!(h.runtime.call_count("start_container"), 2);
    h.runtime.recover("start_container");
    assert_eq!(h.orchestrator.get_container("llama2_7b").await, None);
}

#[tokio::test]
async fn test_pull_launch_failure_cleans_up() {
    let h = harness().await;
    h.runtime.fail_on("exec");

    assert_eq!(h.orchestrator.run_container(&llama2(), &version("7b")).await, None);
    assert_eq!(h.orchestrator.last_error(), Some(ErrorKind::PartialFailure));
    assert_eq!(h.orchestrator.get_container("llama2_7b").await, None);

    // Nothing dangling, so the next attempt starts clean.
    h.runtime.recover("exec");
    let record = h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    assert_eq!(record.state, RuntimeState::Running);
}

#[tokio::test]
async fn test_existing_container_is_started_without_rewrite() {
    let h = harness().await;
    h.orchestrator.ensure_network("chatbot_network").await.unwrap();
    h.runtime.insert_container(
        &ContainerSpec {
            name: "llama2_7b".to_string(),
            image: "ollama/ollama:latest".to_string(),
            network: "chatbot_network".to_string(),
            container_port: "11434/tcp".to_string(),
            host_port: 11437,
            gpus: true,
            env: vec!["model=llama2".to_string(), "custom=kept".to_string()],
        },
        RuntimeState::Exited,
    );

    let record = h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    assert_eq!(record.state, RuntimeState::Running);
    assert_eq!(record.env, vec!["model=llama2", "custom=kept"]);
    assert_eq!(h.runtime.call_count("create_container"), 0);
    assert_eq!(h.runtime.call_count("exec"), 0);
}

#[tokio::test]
async fn test_concurrent_runs_create_once() {
    let h = harness().await;
    let orchestrator = Arc::new(h.orchestrator);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator.run_container(&llama2(), &version("7b")).await
        }));
    }
    for task in tasks {
        let record = task.await.unwrap().expect("every caller gets the container");
        assert_eq!(record.name, "llama2_7b");
    }

    assert_eq!(h.runtime.call_count("create_container"), 1);
}

#[tokio::test]
async fn test_set_env_recreates_container() {
    let h = harness().await;
    let before = h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();

    let after = h
        .orchestrator
        .set_container_env("llama2_7b", "OLLAMA_KEEP_ALIVE", "5m")
        .await
        .unwrap();

    assert_ne!(before.id, after.id);
    assert_eq!(after.state, RuntimeState::Running);
    assert_eq!(after.env_value("OLLAMA_KEEP_ALIVE"), Some("5m"));
    assert_eq!(after.metadata(), before.metadata());
    assert_eq!(after.host_port("11434/tcp"), Some("11437"));
    assert_eq!(
        h.orchestrator
            .get_container_env("llama2_7b", "OLLAMA_KEEP_ALIVE")
            .await
            .as_deref(),
        Some("5m")
    );
    // The recreated engine pulls its model again.
    assert_eq!(h.runtime.exec_history("llama2_7b").len(), 2);
}

#[tokio::test]
async fn test_set_env_keeps_stopped_container_stopped() {
    let h = harness().await;
    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    h.orchestrator.stop_container("llama2_7b").await;

    let after = h
        .orchestrator
        .set_container_env("llama2_7b", "OLLAMA_KEEP_ALIVE", "5m")
        .await
        .unwrap();
    assert_eq!(after.state, RuntimeState::Created);
    assert_eq!(after.env_value("OLLAMA_KEEP_ALIVE"), Some("5m"));
    assert_eq!(after.env_value("parameters"), Some("7b"));
}

#[tokio::test]
async fn test_set_env_cannot_retarget_model() {
    let h = harness().await;
    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    h.orchestrator.run_container(&llama2(), &version("13b")).await.unwrap();

    for key in ["model", "parameters", "port"] {
        assert_eq!(h.orchestrator.set_container_env("llama2_7b", key, "13b").await, None);
        assert_eq!(h.orchestrator.last_error(), Some(ErrorKind::InvalidRequest));
    }

    let seven = h.orchestrator.get_container("llama2_7b").await.unwrap();
    assert_eq!(seven.env_value("parameters"), Some("7b"));
    assert_eq!(h.runtime.call_count("create_container"), 2);
}

#[tokio::test]
async fn test_set_env_restores_container_when_recreate_fails() {
    let h = harness().await;
    let before = h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    h.runtime.fail_once("create_container");

    assert_eq!(
        h.orchestrator.set_container_env("llama2_7b", "OLLAMA_KEEP_ALIVE", "5m").await,
        None
    );
    assert_eq!(h.orchestrator.last_error(), Some(ErrorKind::DaemonError));

    let restored = h.orchestrator.get_container("llama2_7b").await.unwrap();
    assert_eq!(restored.state, RuntimeState::Running);
    assert_eq!(restored.env, before.env);
    assert_eq!(restored.host_port("11434/tcp"), Some("11437"));
    assert_eq!(h.runtime.gpus_of("llama2_7b"), Some(true));
    assert_eq!(h.runtime.exec_history("llama2_7b").len(), 2);
}

#[tokio::test]
async fn test_set_env_on_missing_container() {
    let h = harness().await;
    assert_eq!(h.orchestrator.set_container_env("ghost_1b", "a", "b").await, None);
    assert_eq!(h.orchestrator.last_error(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_inference_client_follows_port() {
    let h = harness().await;
    assert!(h.orchestrator.inference_client("llama2", "7b").await.is_none());

    h.orchestrator.run_container(&llama2(), &version("7b")).await.unwrap();
    let client = h.orchestrator.inference_client("llama2", "7b").await.unwrap();
    assert_eq!(client.base_url(), "http://localhost:11437");
}

#[tokio::test]
async fn test_network_lookup() {
    let h = harness().await;
    assert_eq!(h.orchestrator.get_network("chatbot_network").await, None);

    let created = h.orchestrator.ensure_network("chatbot_network").await.unwrap();
    let found = h.orchestrator.get_network("chatbot_network").await.unwrap();
    assert_eq!(created, found);
    assert_eq!(h.runtime.network_names(), vec!["chatbot_network"]);
}

#[tokio::test]
async fn test_daemon_errors_keep_connection() {
    let h = harness().await;
    h.runtime.fail_on("list_containers");

    assert!(h.orchestrator.list_available().await.is_empty());
    assert_eq!(h.orchestrator.last_error(), Some(ErrorKind::DaemonError));
    assert!(h.orchestrator.is_connected());
    assert_eq!(h.connector.attempts(), 1);
}
