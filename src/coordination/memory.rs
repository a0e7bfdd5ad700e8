//! Process-local coordination tree.
//!
//! Reproduces the parts of ZooKeeper semantics the engine depends on:
//! - watches are one-shot and non-recursive
//! - a children watch fires on child create/delete and on the node's own deletion
//! - a data watch fires on value change and on deletion
//! - dropping the session (suspend/expire/close) cancels every pending watch,
//!   and changes made while disconnected produce no notification at all
//!
//! Mutators (`create`, `set_data`, `delete`) model other clients writing to
//! the service, so they work regardless of this client's session state.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use super::parent_path;
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

type WatchSenders = HashMap<String, Vec<oneshot::Sender<NodeEvent>>>;

#[derive(Debug)]
struct TreeState {
    /// Full path -> value. The root always exists.
    nodes: BTreeMap<String, Vec<u8>>,
    child_watches: WatchSenders,
    data_watches: WatchSenders,
    session: SessionState,
}

#[derive(Debug, Clone)]
pub struct InMemoryCoordinator {
    inner: Arc<Mutex<TreeState>>,
    notices: broadcast::Sender<ClientNotice>,
    list_calls: Arc<AtomicUsize>,
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinator {
    /// Empty tree with a connected session
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Vec::new());
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            inner: Arc::new(Mutex::new(TreeState {
                nodes,
                child_watches: HashMap::new(),
                data_watches: HashMap::new(),
                session: SessionState::Connected,
            })),
            notices,
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Plain (unwatched) listings served so far
    pub fn list_children_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of watches currently registered and not yet fired
    pub fn pending_watches(&self) -> usize {
        let state = self.inner.lock();
        state.child_watches.values().map(Vec::len).sum::<usize>()
            + state.data_watches.values().map(Vec::len).sum::<usize>()
    }

    pub fn exists(
        &self,
        path: &str,
    ) -> bool {
        self.inner.lock().nodes.contains_key(path)
    }

    /// Creates `path` and any missing ancestors with empty values
    pub fn ensure_path(
        &self,
        path: &str,
    ) -> CoordinationResult<()> {
        let mut missing = Vec::new();
        let mut cursor = Some(path);
        while let Some(p) = cursor {
            if self.exists(p) {
                break;
            }
            missing.push(p.to_string());
            cursor = parent_path(p);
        }
        for p in missing.into_iter().rev() {
            self.create(&p, Vec::new())?;
        }
        Ok(())
    }

    pub fn create(
        &self,
        path: &str,
        value: impl Into<Vec<u8>>,
    ) -> CoordinationResult<()> {
        let parent = parent_path(path).ok_or_else(|| CoordinationError::Other("cannot create root".into()))?;
        let fired = {
            let mut state = self.inner.lock();
            if !state.nodes.contains_key(parent) {
                return Err(CoordinationError::NoNode(parent.to_string()));
            }
            if state.nodes.contains_key(path) {
                return Err(CoordinationError::Other(format!("node exists: {path}")));
            }
            state.nodes.insert(path.to_string(), value.into());

            let mut fired = take_watches(&mut state.data_watches, path, NodeEventKind::Created);
            fired.extend(take_watches(
                &mut state.child_watches,
                parent,
                NodeEventKind::ChildrenChanged,
            ));
            fired
        };
        debug!(%path, "znode created");
        deliver(fired);
        Ok(())
    }

    pub fn set_data(
        &self,
        path: &str,
        value: impl Into<Vec<u8>>,
    ) -> CoordinationResult<()> {
        let fired = {
            let mut state = self.inner.lock();
            match state.nodes.get_mut(path) {
                Some(slot) => *slot = value.into(),
                None => return Err(CoordinationError::NoNode(path.to_string())),
            }
            take_watches(&mut state.data_watches, path, NodeEventKind::DataChanged)
        };
        debug!(%path, "znode updated");
        deliver(fired);
        Ok(())
    }

    pub fn delete(
        &self,
        path: &str,
    ) -> CoordinationResult<()> {
        let parent = parent_path(path).ok_or_else(|| CoordinationError::Other("cannot delete root".into()))?;
        let fired = {
            let mut state = self.inner.lock();
            if !state.nodes.contains_key(path) {
                return Err(CoordinationError::NoNode(path.to_string()));
            }
            if !children_of(&state.nodes, path).is_empty() {
                return Err(CoordinationError::Other(format!("node not empty: {path}")));
            }
            state.nodes.remove(path);

            let mut fired = take_watches(&mut state.data_watches, path, NodeEventKind::Deleted);
            fired.extend(take_watches(&mut state.child_watches, path, NodeEventKind::Deleted));
            fired.extend(take_watches(
                &mut state.child_watches,
                parent,
                NodeEventKind::ChildrenChanged,
            ));
            fired
        };
        debug!(%path, "znode deleted");
        deliver(fired);
        Ok(())
    }

    /// Connection drops; pending watches are cancelled.
    pub fn suspend(&self) {
        self.transition(SessionState::Suspended, true);
    }

    /// Session expires; pending watches are cancelled.
    pub fn expire(&self) {
        self.transition(SessionState::Lost, true);
    }

    /// Connection (or a fresh session) comes back.
    pub fn reconnect(&self) {
        self.transition(SessionState::Connected, false);
    }

    pub fn close(&self) {
        self.transition(SessionState::Closed, true);
    }

    /// Pushes a background failure to listeners, as a real client would for
    /// errors it cannot tie to a request.
    pub fn report_unhandled_error(
        &self,
        message: impl Into<String>,
    ) {
        let _ = self.notices.send(ClientNotice::UnhandledError(message.into()));
    }

    fn transition(
        &self,
        next: SessionState,
        cancel_watches: bool,
    ) {
        {
            let mut state = self.inner.lock();
            state.session = next;
            if cancel_watches {
                // Dropping the senders resolves every pending watch to `None`.
                state.child_watches.clear();
                state.data_watches.clear();
            }
        }
        debug!(state = ?next, "session transition");
        let _ = self.notices.send(ClientNotice::State(next));
    }

    fn check_session(
        &self,
        state: &TreeState,
        path: &str,
    ) -> CoordinationResult<()> {
        match state.session {
            SessionState::Connected => Ok(()),
            SessionState::Connecting | SessionState::Suspended => {
                Err(CoordinationError::ConnectionLoss(path.to_string()))
            }
            SessionState::Lost | SessionState::Closed => Err(CoordinationError::SessionLost(path.to_string())),
        }
    }
}

#[async_trait]
impl CoordinationClient for InMemoryCoordinator {
    async fn list_children(
        &self,
        path: &str,
    ) -> CoordinationResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.lock();
        self.check_session(&state, path)?;
        if !state.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        Ok(children_of(&state.nodes, path))
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> CoordinationResult<Vec<u8>> {
        let state = self.inner.lock();
        self.check_session(&state, path)?;
        state
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn watch_children(
        &self,
        path: &str,
    ) -> CoordinationResult<(Vec<String>, OneshotWatch)> {
        let mut state = self.inner.lock();
        self.check_session(&state, path)?;
        if !state.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        let children = children_of(&state.nodes, path);
        let (tx, watch) = OneshotWatch::channel(path);
        state.child_watches.entry(path.to_string()).or_default().push(tx);
        trace!(%path, "children watch registered");
        Ok((children, watch))
    }

    async fn watch_data(
        &self,
        path: &str,
    ) -> CoordinationResult<OneshotWatch> {
        let mut state = self.inner.lock();
        self.check_session(&state, path)?;
        if !state.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        let (tx, watch) = OneshotWatch::channel(path);
        state.data_watches.entry(path.to_string()).or_default().push(tx);
        trace!(%path, "data watch registered");
        Ok(watch)
    }

    fn state(&self) -> SessionState {
        self.inner.lock().session
    }

    fn notifications(&self) -> broadcast::Receiver<ClientNotice> {
        self.notices.subscribe()
    }
}

/// Hands out a shared [`InMemoryCoordinator`], optionally refusing the first
/// few connection attempts.
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    coordinator: InMemoryCoordinator,
    refuse_remaining: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl InMemoryConnector {
    pub fn new(coordinator: InMemoryCoordinator) -> Self {
        Self {
            coordinator,
            refuse_remaining: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the next `n` attempts fail with a connection loss
    pub fn refuse_first(
        self,
        n: usize,
    ) -> Self {
        self.refuse_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> CoordinationResult<Arc<dyn CoordinationClient>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(CoordinationError::ConnectionLoss(endpoint.to_string()));
        }
        Ok(Arc::new(self.coordinator.clone()))
    }
}

fn children_of(
    nodes: &BTreeMap<String, Vec<u8>>,
    path: &str,
) -> Vec<String> {
    nodes
        .keys()
        .filter(|key| key.as_str() != "/" && parent_path(key) == Some(path))
        .filter_map(|key| key.rsplit('/').next().map(str::to_string))
        .collect()
}

fn take_watches(
    watches: &mut WatchSenders,
    path: &str,
    kind: NodeEventKind,
) -> Vec<(oneshot::Sender<NodeEvent>, NodeEvent)> {
    watches
        .remove(path)
        .unwrap_or_default()
        .into_iter()
        .map(|tx| {
            (
                tx,
                NodeEvent {
                    path: path.to_string(),
                    kind,
                },
            )
        })
        .collect()
}

fn deliver(fired: Vec<(oneshot::Sender<NodeEvent>, NodeEvent)>) {
    for (tx, event) in fired {
        // Receiver may already be gone; a one-shot watch nobody awaits is moot.
        let _ = tx.send(event);
    }
}
