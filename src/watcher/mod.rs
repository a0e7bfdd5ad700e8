//! Persistent recursive watch over one-shot, non-recursive primitives.
//!
//! The coordination service only offers watches that fire once and only for
//! the node they were set on. [`TreeWatcher`] keeps a children watch on the
//! base path and a data watch on every child, re-arming each one as soon as
//! it fires, so that every add, update and removal under the base path turns
//! into one [`ChangeSignal`].
//!
//! Two sets drive the protocol:
//! - `known`: child names seen in the last listing
//! - `armed`: full paths that currently hold an outstanding watch; a path in
//!   this set is never armed again until its watch fires or is cancelled
//!
//! Watches die with the session. After a Suspended/Lost -> Connected
//! transition everything is re-armed from scratch and a `Reconnected` signal
//! is emitted, since events during the gap are lost for good.


use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::FutureExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::child_path;
use crate::CoordinationClient;
use crate::CoordinationError;
use crate::NodeEvent;
use crate::NodeEventKind;
use crate::OneshotWatch;
use crate::Result;
use crate::SessionState;
use crate::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Coverage established for the first time
    Initialized,
    Added,
    Updated,
    Removed,
    /// Coverage re-established after the session came back
    Reconnected,
}

/// Logical "the subtree changed" notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSignal {
    pub kind: ChangeKind,
    /// Node the change was observed on; `None` for whole-tree signals
    pub path: Option<String>,
}

impl ChangeSignal {
    pub fn new(
        kind: ChangeKind,
        path: Option<String>,
    ) -> Self {
        Self { kind, path }
    }
}

type FiredWatch = BoxFuture<'static, (String, Option<NodeEvent>)>;

/// Result of re-listing the base path against the known children
#[derive(Debug, Default)]
struct ChildDiff {
    added: Vec<String>,
    removed: Vec<String>,
}

pub struct TreeWatcher {
    client: Arc<dyn CoordinationClient>,
    base_path: String,
    known: BTreeSet<String>,
    armed: HashSet<String>,
    pending: FuturesUnordered<FiredWatch>,
    session: watch::Receiver<SessionState>,
    last_state: SessionState,
    signals: mpsc::Sender<ChangeSignal>,
}

impl TreeWatcher {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        session: watch::Receiver<SessionState>,
        base_path: impl Into<String>,
        signals: mpsc::Sender<ChangeSignal>,
    ) -> Self {
        let last_state = *session.borrow();
        Self {
            client,
            base_path: base_path.into(),
            known: BTreeSet::new(),
            armed: HashSet::new(),
            pending: FuturesUnordered::new(),
            session,
            last_state,
            signals,
        }
    }

    /// Children currently covered by a data watch or awaiting one
    pub fn known_children(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }

    pub fn is_armed(
        &self,
        path: &str,
    ) -> bool {
        self.armed.contains(path)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Arms the base path and every listed child, then emits `Initialized`.
    pub async fn start(&mut self) -> Result<()> {
        self.rearm().await?;
        info!(base_path = %self.base_path, children = self.known.len(), "subtree watch established");
        self.emit(ChangeKind::Initialized, None)
    }

    /// Starts coverage and keeps it alive until a fatal error.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        loop {
            self.step().await?;
        }
    }

    /// Waits for the next session transition or fired watch and handles it.
    pub async fn step(&mut self) -> Result<()> {
        tokio::select! {
            biased;
            changed = self.session.changed() => {
                let next = match changed {
                    Ok(()) => *self.session.borrow_and_update(),
                    // The monitor only goes away after a terminal state
                    Err(_) => SessionState::Closed,
                };
                self.on_session_state(next).await
            }
            Some((path, event)) = self.pending.next(), if !self.pending.is_empty() => {
                self.on_watch_fired(path, event).await
            }
        }
    }

    async fn on_session_state(
        &mut self,
        next: SessionState,
    ) -> Result<()> {
        let previous = std::mem::replace(&mut self.last_state, next);
        if previous == next {
            return Ok(());
        }
        debug!(from = ?previous, to = ?next, "watcher observed session transition");

        match next {
            SessionState::Closed => Err(WatchError::SessionClosed(self.base_path.clone()).into()),
            SessionState::Connected => self.resync().await,
            SessionState::Suspended | SessionState::Lost => {
                warn!(base_path = %self.base_path, state = ?next, "watch coverage interrupted");
                Ok(())
            }
            SessionState::Connecting => Ok(()),
        }
    }

    async fn on_watch_fired(
        &mut self,
        path: String,
        event: Option<NodeEvent>,
    ) -> Result<()> {
        self.armed.remove(&path);

        let Some(event) = event else {
            // Cancelled by the session, not a change. If the client is
            // already back we may have missed its Suspended state entirely.
            if self.client.state().is_connected() && self.last_state.is_connected() {
                debug!(%path, "watch cancelled under a live session");
                return self.resync().await;
            }
            trace!(%path, "watch cancelled");
            return Ok(());
        };

        trace!(%path, kind = ?event.kind, "watch fired");
        if path == self.base_path && event.kind == NodeEventKind::Deleted {
            return Err(WatchError::PathGone(self.base_path.clone()).into());
        }

        let diff = self.rearm().await?;

        let (kind, changed) = if path == self.base_path {
            if let Some(name) = diff.added.first() {
                (ChangeKind::Added, child_path(&self.base_path, name))
            } else if let Some(name) = diff.removed.first() {
                (ChangeKind::Removed, child_path(&self.base_path, name))
            } else {
                (ChangeKind::Updated, path)
            }
        } else {
            match event.kind {
                NodeEventKind::Created => (ChangeKind::Added, path),
                NodeEventKind::Deleted => (ChangeKind::Removed, path),
                NodeEventKind::DataChanged | NodeEventKind::ChildrenChanged => (ChangeKind::Updated, path),
            }
        };

        self.emit(kind, Some(changed))
    }

    /// Drops every outstanding watch and re-arms the whole subtree.
    async fn resync(&mut self) -> Result<()> {
        self.pending = FuturesUnordered::new();
        self.armed.clear();
        self.rearm().await?;
        info!(base_path = %self.base_path, children = self.known.len(), "watch coverage restored");
        self.emit(ChangeKind::Reconnected, None)
    }

    /// Re-lists the base path, arms whatever lacks a watch and updates
    /// `known`.
    async fn rearm(&mut self) -> Result<ChildDiff> {
        let children = if self.armed.contains(&self.base_path) {
            self.client
                .list_children(&self.base_path)
                .await
                .map_err(|e| self.registration_error(&self.base_path, e))?
        } else {
            let (children, watch) = self
                .client
                .watch_children(&self.base_path)
                .await
                .map_err(|e| self.registration_error(&self.base_path, e))?;
            self.arm(watch);
            children
        };

        let listed: BTreeSet<String> = children.into_iter().collect();
        let diff = ChildDiff {
            added: listed.difference(&self.known).cloned().collect(),
            removed: self.known.difference(&listed).cloned().collect(),
        };
        self.known = listed;

        let unarmed: Vec<String> = self
            .known
            .iter()
            .map(|name| child_path(&self.base_path, name))
            .filter(|path| !self.armed.contains(path))
            .collect();

        for path in unarmed {
            match self.client.watch_data(&path).await {
                Ok(watch) => self.arm(watch),
                Err(CoordinationError::NoNode(_)) => {
                    // Deleted since the listing; the children watch reports it.
                    debug!(%path, "child vanished before its watch was set");
                    if let Some(name) = path.rsplit('/').next() {
                        self.known.remove(name);
                    }
                }
                Err(e) => return Err(WatchError::Registration { path, source: e }.into()),
            }
        }

        if !diff.added.is_empty() || !diff.removed.is_empty() {
            debug!(added = ?diff.added, removed = ?diff.removed, "child set changed");
        }
        Ok(diff)
    }

    fn arm(
        &mut self,
        watch: OneshotWatch,
    ) {
        let path = watch.path().to_string();
        self.armed.insert(path.clone());
        self.pending.push(async move { (path, watch.fired().await) }.boxed());
    }

    fn registration_error(
        &self,
        path: &str,
        err: CoordinationError,
    ) -> crate::Error {
        match err {
            CoordinationError::NoNode(_) => WatchError::PathGone(path.to_string()).into(),
            source => WatchError::Registration {
                path: path.to_string(),
                source,
            }
            .into(),
        }
    }

    fn emit(
        &self,
        kind: ChangeKind,
        path: Option<String>,
    ) -> Result<()> {
        let signal = ChangeSignal::new(kind, path);
        match self.signals.try_send(signal) {
            Ok(()) => Ok(()),
            // Queued signals already guarantee a pass that starts after now.
            Err(TrySendError::Full(signal)) => {
                debug!(?signal, "signal buffer full, change folded into queued signals");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(WatchError::SignalChannelClosed.into()),
        }
    }
}
