mod common;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use rack_sync::ConnectionError;
use rack_sync::CoordinationClient;
use rack_sync::CoordinationError;
use rack_sync::Connector;
use rack_sync::Error;
use rack_sync::InMemoryConnector;
use rack_sync::InMemoryCoordinator;
use rack_sync::ResolutionError;
use rack_sync::StaticResolver;
use rack_sync::WatchError;
use tokio::time::timeout;

/// Opens a brand-new coordinator session on every connect, like a real
/// client does after an expiry.
struct FreshSessionConnector {
    sessions: Mutex<VecDeque<InMemoryCoordinator>>,
}

impl FreshSessionConnector {
    fn new(sessions: Vec<InMemoryCoordinator>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
        }
    }
}

#[async_trait]
impl Connector for FreshSessionConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<Arc<dyn CoordinationClient>, CoordinationError> {
        match self.sessions.lock().pop_front() {
            Some(coordinator) => Ok(Arc::new(coordinator)),
            None => Err(CoordinationError::ConnectionLoss(endpoint.to_string())),
        }
    }
}

fn resolver() -> Arc<StaticResolver> {
    Arc::new(
        StaticResolver::new()
            .with("host-a", "10.0.0.1")
            .with("host-b", "10.0.0.2")
            .with("host-c", "10.0.0.3"),
    )
}

#[tokio::test]
async fn test_file_follows_adds_updates_and_removals() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let coordinator = InMemoryCoordinator::new();
    seed(&coordinator, &[("host-a", "rack1"), ("host-b", "rack2")]);

    let running = start(
        config(&output),
        InMemoryConnector::new(coordinator.clone()),
        resolver(),
    );
    wait_for_content(&output, "10.0.0.1 rack1\n10.0.0.2 rack2\n").await;

    coordinator.create(&format!("{BASE}/host-c"), "rack1").unwrap();
    wait_for_content(&output, "10.0.0.1 rack1\n10.0.0.2 rack2\n10.0.0.3 rack1\n").await;

    coordinator.set_data(&format!("{BASE}/host-b"), "rack5").unwrap();
    wait_for_content(&output, "10.0.0.1 rack1\n10.0.0.2 rack5\n10.0.0.3 rack1\n").await;

    coordinator.delete(&format!("{BASE}/host-a")).unwrap();
    wait_for_content(&output, "10.0.0.2 rack5\n10.0.0.3 rack1\n").await;

    running.shutdown.send(()).unwrap();
    assert!(running.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_changes_missed_while_suspended_are_picked_up_on_reconnect() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let coordinator = InMemoryCoordinator::new();
    seed(&coordinator, &[("host-a", "rack1")]);

    let running = start(
        config(&output),
        InMemoryConnector::new(coordinator.clone()),
        resolver(),
    );
    wait_for_content(&output, "10.0.0.1 rack1\n").await;

    coordinator.suspend();
    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.create(&format!("{BASE}/host-b"), "rack2").unwrap();
    coordinator.set_data(&format!("{BASE}/host-a"), "rack3").unwrap();
    coordinator.reconnect();

    wait_for_content(&output, "10.0.0.1 rack3\n10.0.0.2 rack2\n").await;

    // Coverage is live again after the reconnect
    coordinator.create(&format!("{BASE}/host-c"), "rack1").unwrap();
    wait_for_content(&output, "10.0.0.1 rack3\n10.0.0.2 rack2\n10.0.0.3 rack1\n").await;

    running.shutdown.send(()).unwrap();
    assert!(running.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_expired_session_is_replaced_and_coverage_resumes() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let first = InMemoryCoordinator::new();
    seed(&first, &[("host-a", "rack1")]);
    // The service as seen by the next session, including changes made
    // while the old one was expiring
    let second = InMemoryCoordinator::new();
    seed(&second, &[("host-a", "rack1"), ("host-b", "rack2")]);

    let running = start_with(
        config(&output),
        Arc::new(FreshSessionConnector::new(vec![first.clone(), second.clone()])),
        resolver(),
    );
    wait_for_content(&output, "10.0.0.1 rack1\n").await;

    first.expire();
    wait_for_content(&output, "10.0.0.1 rack1\n10.0.0.2 rack2\n").await;

    // Watches were re-armed on the new session
    second.create(&format!("{BASE}/host-c"), "rack3").unwrap();
    wait_for_content(&output, "10.0.0.1 rack1\n10.0.0.2 rack2\n10.0.0.3 rack3\n").await;

    running.shutdown.send(()).unwrap();
    assert!(running.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_expired_session_that_cannot_be_replaced_is_fatal() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let first = InMemoryCoordinator::new();
    seed(&first, &[("host-a", "rack1")]);

    let running = start_with(
        config(&output),
        Arc::new(FreshSessionConnector::new(vec![first.clone()])),
        resolver(),
    );
    wait_for_content(&output, "10.0.0.1 rack1\n").await;

    first.expire();

    let result = timeout(Duration::from_secs(2), running.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Watch(WatchError::SessionClosed(_)))));
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "10.0.0.1 rack1\n");
}

#[tokio::test]
async fn test_unresolvable_host_keeps_file_and_ends_run_with_error() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let coordinator = InMemoryCoordinator::new();
    seed(&coordinator, &[("host-a", "rack1"), ("host-b", "rack2")]);
    let resolver = resolver();
    resolver.remove("host-c");

    let running = start(
        config(&output),
        InMemoryConnector::new(coordinator.clone()),
        resolver,
    );
    wait_for_content(&output, "10.0.0.1 rack1\n10.0.0.2 rack2\n").await;

    coordinator.create(&format!("{BASE}/host-c"), "rack1").unwrap();

    let result = timeout(Duration::from_secs(2), running.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(Error::Resolution(ResolutionError::Unresolvable { host, .. })) if host == "host-c"
    ));
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "10.0.0.1 rack1\n10.0.0.2 rack2\n"
    );
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_after_retries() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let connector = InMemoryConnector::new(InMemoryCoordinator::new()).refuse_first(usize::MAX);

    let running = start(config(&output), connector.clone(), resolver());

    let result = running.handle.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::Connection(ConnectionError::RetriesExhausted { attempts: 3, .. }))
    ));
    assert_eq!(connector.attempts(), 3);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_slow_start_connects_within_retry_budget() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let coordinator = InMemoryCoordinator::new();
    seed(&coordinator, &[("host-a", "rack1")]);
    let connector = InMemoryConnector::new(coordinator).refuse_first(2);

    let running = start(config(&output), connector, resolver());

    wait_for_content(&output, "10.0.0.1 rack1\n").await;
    running.shutdown.send(()).unwrap();
    assert!(running.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_missing_base_path_is_fatal() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");

    let running = start(
        config(&output),
        InMemoryConnector::new(InMemoryCoordinator::new()),
        resolver(),
    );

    let result = timeout(Duration::from_secs(2), running.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Watch(WatchError::PathGone(_)))));
}

#[tokio::test]
async fn test_closed_session_is_fatal() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let coordinator = InMemoryCoordinator::new();
    seed(&coordinator, &[("host-a", "rack1")]);

    let running = start(
        config(&output),
        InMemoryConnector::new(coordinator.clone()),
        resolver(),
    );
    wait_for_content(&output, "10.0.0.1 rack1\n").await;

    coordinator.close();

    let result = timeout(Duration::from_secs(2), running.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Watch(WatchError::SessionClosed(_)))));
}

#[tokio::test]
async fn test_dropped_shutdown_sender_is_fatal() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let coordinator = InMemoryCoordinator::new();
    seed(&coordinator, &[("host-a", "rack1")]);

    let Running { shutdown, handle } = start(
        config(&output),
        InMemoryConnector::new(coordinator),
        resolver(),
    );
    drop(shutdown);

    let result = timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Fatal(_))));
}

#[tokio::test]
async fn test_shutdown_sender_dropped_after_start_is_fatal() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("rack_topology.data");
    let coordinator = InMemoryCoordinator::new();
    seed(&coordinator, &[("host-a", "rack1")]);

    let running = start(
        config(&output),
        InMemoryConnector::new(coordinator),
        resolver(),
    );
    wait_for_content(&output, "10.0.0.1 rack1\n").await;
    drop(running.shutdown);

    let result = timeout(Duration::from_secs(2), running.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Fatal(_))));
}
