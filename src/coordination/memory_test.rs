use super::*;
use crate::CoordinationError;

fn seeded() -> InMemoryCoordinator {
    let coordinator = InMemoryCoordinator::new();
    coordinator.ensure_path("/racks").unwrap();
    coordinator.create("/racks/host-a", "rack1").unwrap();
    coordinator.create("/racks/host-b", "rack2").unwrap();
    coordinator
}

#[test]
fn test_child_and_parent_path_helpers() {
    assert_eq!(child_path("/", "a"), "/a");
    assert_eq!(child_path("/racks", "host-a"), "/racks/host-a");
    assert_eq!(parent_path("/racks/host-a"), Some("/racks"));
    assert_eq!(parent_path("/racks"), Some("/"));
    assert_eq!(parent_path("/"), None);
}

#[tokio::test]
async fn test_list_children_returns_names_in_listing_order() {
    let coordinator = seeded();

    let children = coordinator.list_children("/racks").await.unwrap();
    assert_eq!(children, vec!["host-a".to_string(), "host-b".to_string()]);
    assert_eq!(coordinator.get_data("/racks/host-b").await.unwrap(), b"rack2".to_vec());
}

#[tokio::test]
async fn test_list_children_is_not_recursive() {
    let coordinator = seeded();
    coordinator.create("/racks/host-a/nested", "x").unwrap();

    let children = coordinator.list_children("/racks").await.unwrap();
    assert_eq!(children.len(), 2);
}

#[tokio::test]
async fn test_missing_node_reports_no_node() {
    let coordinator = InMemoryCoordinator::new();

    assert_eq!(
        coordinator.list_children("/nope").await,
        Err(CoordinationError::NoNode("/nope".to_string()))
    );
    assert!(matches!(
        coordinator.watch_data("/nope").await,
        Err(CoordinationError::NoNode(_))
    ));
    assert!(matches!(
        coordinator.create("/nope/child", "v"),
        Err(CoordinationError::NoNode(_))
    ));
}

#[tokio::test]
async fn test_children_watch_fires_once_on_create() {
    let coordinator = seeded();
    let (_, watch) = coordinator.watch_children("/racks").await.unwrap();

    coordinator.create("/racks/host-c", "rack1").unwrap();
    // a second change must not be delivered to the already fired watch
    coordinator.create("/racks/host-d", "rack1").unwrap();

    let event = watch.fired().await.unwrap();
    assert_eq!(event.path, "/racks");
    assert_eq!(event.kind, NodeEventKind::ChildrenChanged);
    assert_eq!(coordinator.pending_watches(), 0);
}

#[tokio::test]
async fn test_data_watch_fires_on_update_and_delete() {
    let coordinator = seeded();

    let watch = coordinator.watch_data("/racks/host-a").await.unwrap();
    coordinator.set_data("/racks/host-a", "rack9").unwrap();
    assert_eq!(watch.fired().await.unwrap().kind, NodeEventKind::DataChanged);

    let watch = coordinator.watch_data("/racks/host-a").await.unwrap();
    let (_, children_watch) = coordinator.watch_children("/racks").await.unwrap();
    coordinator.delete("/racks/host-a").unwrap();

    assert_eq!(watch.fired().await.unwrap().kind, NodeEventKind::Deleted);
    assert_eq!(
        children_watch.fired().await.unwrap().kind,
        NodeEventKind::ChildrenChanged
    );
}

#[tokio::test]
async fn test_data_change_does_not_fire_parent_children_watch() {
    let coordinator = seeded();
    let (_, watch) = coordinator.watch_children("/racks").await.unwrap();

    coordinator.set_data("/racks/host-a", "rack3").unwrap();

    assert_eq!(coordinator.pending_watches(), 1);
    drop(watch);
}

#[tokio::test]
async fn test_suspend_cancels_watches_and_blocks_requests() {
    let coordinator = seeded();
    let watch = coordinator.watch_data("/racks/host-a").await.unwrap();

    coordinator.suspend();
    assert_eq!(watch.fired().await, None);
    assert_eq!(coordinator.state(), SessionState::Suspended);
    assert!(matches!(
        coordinator.list_children("/racks").await,
        Err(CoordinationError::ConnectionLoss(_))
    ));

    // writes from other clients still land, silently
    coordinator.create("/racks/host-c", "rack1").unwrap();

    coordinator.reconnect();
    let children = coordinator.list_children("/racks").await.unwrap();
    assert_eq!(children.len(), 3);
}

#[tokio::test]
async fn test_expired_session_reports_session_lost() {
    let coordinator = seeded();
    coordinator.expire();

    assert!(matches!(
        coordinator.get_data("/racks/host-a").await,
        Err(CoordinationError::SessionLost(_))
    ));
}

#[tokio::test]
async fn test_notifications_carry_state_and_unhandled_errors() {
    let coordinator = seeded();
    let mut notices = coordinator.notifications();

    coordinator.suspend();
    coordinator.report_unhandled_error("boom");
    coordinator.reconnect();

    assert_eq!(
        notices.recv().await.unwrap(),
        ClientNotice::State(SessionState::Suspended)
    );
    assert_eq!(
        notices.recv().await.unwrap(),
        ClientNotice::UnhandledError("boom".to_string())
    );
    assert_eq!(
        notices.recv().await.unwrap(),
        ClientNotice::State(SessionState::Connected)
    );
}

#[tokio::test]
async fn test_connector_refuses_configured_attempts() {
    let coordinator = seeded();
    let connector = InMemoryConnector::new(coordinator).refuse_first(2);

    assert!(connector.connect("zk:2181").await.is_err());
    assert!(connector.connect("zk:2181").await.is_err());
    let client = connector.connect("zk:2181").await.unwrap();

    assert_eq!(connector.attempts(), 3);
    assert_eq!(client.list_children("/racks").await.unwrap().len(), 2);
}

#[test]
fn test_delete_rejects_non_empty_node() {
    let coordinator = seeded();
    assert!(matches!(
        coordinator.delete("/racks"),
        Err(CoordinationError::Other(_))
    ));
}
