//! Adapter over the `zookeeper-client` crate.
//!
//! Each server-side one-shot watcher is bridged into an [`OneshotWatch`] by a
//! small task. Session events delivered through a watcher (expiry, close)
//! cancel the bridged watch instead of firing it, matching what the engine
//! expects from a lost session. A bridge whose [`OneshotWatch`] was dropped
//! stops right away instead of waiting for the path to change.
//!
//! An expired `zookeeper-client` session never comes back, so `Expired` is
//! reported as `Lost` and the owner is expected to open a new client.

#[cfg(test)]
#[path = "zookeeper_test.rs"]
mod zookeeper_test;

use std::future::Future;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;
use zookeeper_client as zk;

use super::ClientNotice;
use super::CoordinationClient;
use super::CoordinationResult;
use super::Connector;
use super::NodeEvent;
use super::NodeEventKind;
use super::OneshotWatch;
use super::SessionState;
use crate::CoordinationError;

const NOTICE_BUFFER: usize = 64;

/// Opens sessions with `zookeeper_client::Client::connect`.
#[derive(Debug, Default, Clone)]
pub struct ZookeeperConnector;

#[async_trait]
impl Connector for ZookeeperConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> CoordinationResult<Arc<dyn CoordinationClient>> {
        let client = zk::Client::connect(endpoint)
            .await
            .map_err(|e| map_error(endpoint, e))?;
        info!(%endpoint, "zookeeper session established");
        Ok(Arc::new(ZookeeperClient::new(client)))
    }
}

pub struct ZookeeperClient {
    client: zk::Client,
    state: Arc<Mutex<SessionState>>,
    notices: broadcast::Sender<ClientNotice>,
}

impl ZookeeperClient {
    pub fn new(client: zk::Client) -> Self {
        let state = Arc::new(Mutex::new(SessionState::Connected));
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);

        let mut state_watcher = client.state_watcher();
        let task_state = state.clone();
        let task_notices = notices.clone();
        tokio::spawn(async move {
            loop {
                let next = map_state(state_watcher.changed().await);
                *task_state.lock() = next;
                let _ = task_notices.send(ClientNotice::State(next));
                if ends_client(next) {
                    debug!(state = ?next, "zookeeper state watcher finished");
                    break;
                }
            }
        });

        Self { client, state, notices }
    }
}

#[async_trait]
impl CoordinationClient for ZookeeperClient {
    async fn list_children(
        &self,
        path: &str,
    ) -> CoordinationResult<Vec<String>> {
        let (children, _) = self.client.get_children(path).await.map_err(|e| map_error(path, e))?;
        Ok(children)
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> CoordinationResult<Vec<u8>> {
        let (data, _) = self.client.get_data(path).await.map_err(|e| map_error(path, e))?;
        Ok(data)
    }

    async fn watch_children(
        &self,
        path: &str,
    ) -> CoordinationResult<(Vec<String>, OneshotWatch)> {
        let (children, _, watcher) = self
            .client
            .get_and_watch_children(path)
            .await
            .map_err(|e| map_error(path, e))?;
        Ok((children, bridge(path, watcher)))
    }

    async fn watch_data(
        &self,
        path: &str,
    ) -> CoordinationResult<OneshotWatch> {
        let (_, _, watcher) = self
            .client
            .get_and_watch_data(path)
            .await
            .map_err(|e| map_error(path, e))?;
        Ok(bridge(path, watcher))
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn notifications(&self) -> broadcast::Receiver<ClientNotice> {
        self.notices.subscribe()
    }
}

fn bridge(
    path: &str,
    watcher: zk::OneshotWatcher,
) -> OneshotWatch {
    let (tx, watch) = OneshotWatch::channel(path);
    tokio::spawn(forward(tx, async move {
        let event = watcher.changed().await;
        node_event(event.event_type, event.path)
    }));
    watch
}

/// Delivers what `fired` yields unless the receiving side goes away first.
async fn forward<F>(
    mut tx: oneshot::Sender<NodeEvent>,
    fired: F,
) where
    F: Future<Output = Option<NodeEvent>>,
{
    tokio::select! {
        _ = tx.closed() => trace!("bridged watch dropped before firing"),
        event = fired => {
            if let Some(event) = event {
                let _ = tx.send(event);
            }
        }
    }
}

/// Node change carried by a watcher event; `None` for session events, which
/// cancel the watch.
fn node_event(
    event_type: zk::EventType,
    path: String,
) -> Option<NodeEvent> {
    let kind = match event_type {
        zk::EventType::NodeCreated => NodeEventKind::Created,
        zk::EventType::NodeDataChanged => NodeEventKind::DataChanged,
        zk::EventType::NodeDeleted => NodeEventKind::Deleted,
        zk::EventType::NodeChildrenChanged => NodeEventKind::ChildrenChanged,
        other => {
            debug!(?other, %path, "watch cancelled by session event");
            return None;
        }
    };
    Some(NodeEvent { path, kind })
}

/// A client in one of these states will never report anything again.
fn ends_client(state: SessionState) -> bool {
    matches!(state, SessionState::Lost | SessionState::Closed)
}

#[allow(unreachable_patterns)]
fn map_state(state: zk::SessionState) -> SessionState {
    match state {
        zk::SessionState::SyncConnected | zk::SessionState::ConnectedReadOnly => SessionState::Connected,
        zk::SessionState::Disconnected => SessionState::Suspended,
        zk::SessionState::Expired => SessionState::Lost,
        zk::SessionState::AuthFailed | zk::SessionState::Closed => SessionState::Closed,
        other => {
            warn!(?other, "unrecognised zookeeper session state");
            SessionState::Suspended
        }
    }
}

fn map_error(
    path: &str,
    err: zk::Error,
) -> CoordinationError {
    match err {
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::ConnectionLoss => CoordinationError::ConnectionLoss(path.to_string()),
        zk::Error::SessionExpired | zk::Error::ClientClosed => CoordinationError::SessionLost(path.to_string()),
        other => CoordinationError::Other(format!("{path}: {other}")),
    }
}
