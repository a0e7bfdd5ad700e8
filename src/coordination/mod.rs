//! Coordination service abstraction layer
//!
//! The engine only needs a small slice of a ZooKeeper-style client: list the
//! children of a node, read a node's value, and register one-shot,
//! non-recursive watches. Everything else (wire protocol, session
//! renegotiation) stays inside the client implementation.
//!
//! Implementations:
//! - [`InMemoryCoordinator`]: process-local tree with faithful one-shot watch
//!   and session-loss semantics
//! - `ZookeeperClient` (feature `zookeeper`): adapter over `zookeeper-client`
mod memory;
pub use memory::*;

#[cfg(feature = "zookeeper")]
mod zookeeper;
#[cfg(feature = "zookeeper")]
pub use zookeeper::*;

#[cfg(test)]
mod memory_test;

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::oneshot;

use crate::CoordinationError;

pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// Lifecycle of the session between this process and the coordination service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Connected,
    /// Connection dropped, the session may still be alive server-side
    Suspended,
    /// Session expired; watches registered under it are gone
    Lost,
    /// Client shut down, terminal
    Closed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// What a fired one-shot watch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    Created,
    DataChanged,
    Deleted,
    ChildrenChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub path: String,
    pub kind: NodeEventKind,
}

/// Notifications a client pushes outside of any request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
    State(SessionState),
    /// Background failure the client could not attribute to a request
    UnhandledError(String),
}

/// Single-shot, non-recursive watch registered on one path.
///
/// Resolves at most once. A watch whose sender is dropped without firing was
/// cancelled (typically by session loss) and resolves to `None`.
#[derive(Debug)]
pub struct OneshotWatch {
    path: String,
    rx: oneshot::Receiver<NodeEvent>,
}

impl OneshotWatch {
    /// Creates a watch on `path` together with the sender that fires it
    pub fn channel(path: impl Into<String>) -> (oneshot::Sender<NodeEvent>, OneshotWatch) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            OneshotWatch {
                path: path.into(),
                rx,
            },
        )
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn fired(self) -> Option<NodeEvent> {
        self.rx.await.ok()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Names (not full paths) of the children of `path`, in listing order
    async fn list_children(
        &self,
        path: &str,
    ) -> CoordinationResult<Vec<String>>;

    /// Raw value stored at `path`
    async fn get_data(
        &self,
        path: &str,
    ) -> CoordinationResult<Vec<u8>>;

    /// Lists children of `path` and leaves a one-shot watch that fires on the
    /// next change to that child list (or the node's deletion).
    async fn watch_children(
        &self,
        path: &str,
    ) -> CoordinationResult<(Vec<String>, OneshotWatch)>;

    /// One-shot watch on the value of an existing node at `path`; fires on the
    /// next data change or deletion.
    async fn watch_data(
        &self,
        path: &str,
    ) -> CoordinationResult<OneshotWatch>;

    /// Current session state as known by the client
    fn state(&self) -> SessionState;

    /// Subscribes to session transitions and unhandled client errors
    fn notifications(&self) -> broadcast::Receiver<ClientNotice>;
}

/// Opens client sessions against an endpoint.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> CoordinationResult<Arc<dyn CoordinationClient>>;
}

/// Joins a parent path and a child name.
pub fn child_path(
    parent: &str,
    name: &str,
) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent of an absolute path; `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}
