use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rack_sync::child_path;
use rack_sync::BackoffPolicy;
use rack_sync::Connector;
use rack_sync::InMemoryConnector;
use rack_sync::InMemoryCoordinator;
use rack_sync::RackSync;
use rack_sync::RackSyncConfig;
use rack_sync::Result;
use rack_sync::StaticResolver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

pub const BASE: &str = "/hbase-operator/racks";
pub const WAIT_FOR_FILE_IN_MS: u64 = 2000;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

pub fn seed(
    coordinator: &InMemoryCoordinator,
    children: &[(&str, &str)],
) {
    coordinator.ensure_path(BASE).unwrap();
    for (name, rack) in children {
        coordinator.create(&child_path(BASE, name), *rack).unwrap();
    }
}

pub fn config(output: &Path) -> RackSyncConfig {
    let mut config = RackSyncConfig::default();
    config.coordination.endpoint = "zk-test:2181".to_string();
    config.coordination.base_path = BASE.to_string();
    config.topology.output_path = output.to_path_buf();
    config.retry.connect = BackoffPolicy {
        max_retries: 3,
        timeout_ms: 500,
        base_delay_ms: 1,
        max_delay_ms: 10,
    };
    config.validate().unwrap()
}

pub struct Running {
    pub shutdown: watch::Sender<()>,
    pub handle: JoinHandle<Result<()>>,
}

pub fn start(
    config: RackSyncConfig,
    connector: InMemoryConnector,
    resolver: Arc<StaticResolver>,
) -> Running {
    start_with(config, Arc::new(connector), resolver)
}

pub fn start_with(
    config: RackSyncConfig,
    connector: Arc<dyn Connector>,
    resolver: Arc<StaticResolver>,
) -> Running {
    let (shutdown, shutdown_rx) = watch::channel(());
    let app = RackSync::new(config, connector, resolver);
    let handle = tokio::spawn(app.run(shutdown_rx));
    Running { shutdown, handle }
}

/// Polls `path` until its content equals `expected`.
pub async fn wait_for_content(
    path: &Path,
    expected: &str,
) {
    let deadline = time::Instant::now() + Duration::from_millis(WAIT_FOR_FILE_IN_MS);
    loop {
        if let Ok(content) = std::fs::read_to_string(path) {
            if content == expected {
                return;
            }
        }
        if time::Instant::now() > deadline {
            panic!(
                "{path:?} never reached expected content {expected:?}, last: {:?}",
                std::fs::read_to_string(path).ok()
            );
        }
        time::sleep(Duration::from_millis(10)).await;
    }
}
