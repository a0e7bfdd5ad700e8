//! Session ownership.
//!
//! [`ConnectionManager`] opens the session with bounded, jittered exponential
//! backoff. The resulting [`Session`] runs a monitor task that turns the
//! client's notification stream into a `watch` channel of [`SessionState`],
//! so any number of components can observe transitions without owning the
//! client's listener registry.
//!
//! An expired session cannot be revived. When the client reports `Lost`, the
//! monitor opens a fresh client with the same policy and swaps it in behind
//! the handle returned by [`Session::client`], then publishes the new state.
//! If no fresh client can be opened the session is published as `Closed`.


use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::ClientNotice;
use crate::ConnectionError;
use crate::CoordinationClient;
use crate::CoordinationResult;
use crate::Connector;
use crate::Error;
use crate::OneshotWatch;
use crate::Result;
use crate::SessionState;

const NOTICE_BUFFER: usize = 64;

#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: BackoffPolicy,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: BackoffPolicy,
    ) -> Self {
        Self { connector, policy }
    }

    /// Establishes a session against `endpoint`. The session renews itself
    /// through this manager if it expires.
    ///
    /// # Errors
    /// `ConnectionError::RetriesExhausted` once `policy.max_retries` attempts
    /// failed or timed out.
    pub async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<Session> {
        let client = self.open(endpoint).await?;
        info!(%endpoint, "session established");
        Ok(Session::spawn(
            client,
            Some(Renewal {
                manager: self.clone(),
                endpoint: endpoint.to_string(),
            }),
        ))
    }

    async fn open(
        &self,
        endpoint: &str,
    ) -> Result<Arc<dyn CoordinationClient>> {
        info!(%endpoint, max_retries = self.policy.max_retries, "connecting to coordination service");

        let connector = &self.connector;
        let client = task_with_timeout_and_exponential_backoff(
            move || async move {
                connector
                    .connect(endpoint)
                    .await
                    .map_err(|e| Error::from(ConnectionError::Attempt(e.to_string())))
            },
            self.policy,
        )
        .await
        .map_err(|e| {
            error!(%endpoint, error = %e, "giving up on coordination service");
            ConnectionError::RetriesExhausted {
                endpoint: endpoint.to_string(),
                attempts: self.policy.max_retries,
                last_error: e.to_string(),
            }
        })?;
        Ok(client)
    }
}

/// How an expired session gets a replacement client
struct Renewal {
    manager: ConnectionManager,
    endpoint: String,
}

impl Renewal {
    async fn renew(&self) -> Result<Arc<dyn CoordinationClient>> {
        warn!(endpoint = %self.endpoint, "session expired, opening a new one");
        self.manager.open(&self.endpoint).await
    }
}

/// A live client plus the published view of its state.
///
/// Dropping the session stops the monitor task.
pub struct Session {
    client: Arc<SessionClient>,
    state_rx: watch::Receiver<SessionState>,
    monitor: JoinHandle<()>,
}

impl Session {
    /// Monitors `client` without renewal; an expired session stays `Lost`
    /// until the client itself recovers.
    pub fn start(client: Arc<dyn CoordinationClient>) -> Self {
        Self::spawn(client, None)
    }

    fn spawn(
        client: Arc<dyn CoordinationClient>,
        renewal: Option<Renewal>,
    ) -> Self {
        // Subscribe before sampling the state so no transition falls between.
        let notices = client.notifications();
        let (state_tx, state_rx) = watch::channel(client.state());
        let client = Arc::new(SessionClient::new(client));
        let monitor = tokio::spawn(monitor_session(client.clone(), notices, state_tx, renewal));
        Self {
            client,
            state_rx,
            monitor,
        }
    }

    /// Handle that always reads through the session's current client,
    /// including one opened after an expiry.
    pub fn client(&self) -> Arc<dyn CoordinationClient> {
        self.client.clone()
    }

    /// Receiver of session-state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

/// Stable client handle over a replaceable underlying client.
struct SessionClient {
    current: RwLock<Arc<dyn CoordinationClient>>,
    notices: broadcast::Sender<ClientNotice>,
}

impl SessionClient {
    fn new(client: Arc<dyn CoordinationClient>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            current: RwLock::new(client),
            notices,
        }
    }

    fn current(&self) -> Arc<dyn CoordinationClient> {
        self.current.read().clone()
    }

    /// Swaps in `client`; the previous one is dropped once in-flight calls
    /// release it.
    fn replace(
        &self,
        client: Arc<dyn CoordinationClient>,
    ) {
        *self.current.write() = client;
    }
}

#[async_trait]
impl CoordinationClient for SessionClient {
    async fn list_children(
        &self,
        path: &str,
    ) -> CoordinationResult<Vec<String>> {
        self.current().list_children(path).await
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> CoordinationResult<Vec<u8>> {
        self.current().get_data(path).await
    }

    async fn watch_children(
        &self,
        path: &str,
    ) -> CoordinationResult<(Vec<String>, OneshotWatch)> {
        self.current().watch_children(path).await
    }

    async fn watch_data(
        &self,
        path: &str,
    ) -> CoordinationResult<OneshotWatch> {
        self.current().watch_data(path).await
    }

    fn state(&self) -> SessionState {
        self.current().state()
    }

    fn notifications(&self) -> broadcast::Receiver<ClientNotice> {
        self.notices.subscribe()
    }
}

async fn monitor_session(
    session: Arc<SessionClient>,
    mut notices: broadcast::Receiver<ClientNotice>,
    state_tx: watch::Sender<SessionState>,
    renewal: Option<Renewal>,
) {
    loop {
        let next = match notices.recv().await {
            Ok(notice) => {
                let _ = session.notices.send(notice.clone());
                match notice {
                    ClientNotice::State(next) => next,
                    ClientNotice::UnhandledError(message) => {
                        error!(%message, "unhandled coordination client error");
                        continue;
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "session notices lagged, resyncing state");
                session.current().state()
            }
            Err(RecvError::Closed) => {
                debug!("notification stream closed");
                SessionState::Closed
            }
        };

        publish(&state_tx, next);
        if next.is_terminal() {
            break;
        }

        if next == SessionState::Lost {
            let Some(renewal) = &renewal else {
                continue;
            };
            match renewal.renew().await {
                Ok(client) => {
                    notices = client.notifications();
                    let state = client.state();
                    session.replace(client);
                    info!(endpoint = %renewal.endpoint, "session renewed");
                    publish(&state_tx, state);
                }
                Err(e) => {
                    error!(error = %e, "session could not be renewed");
                    publish(&state_tx, SessionState::Closed);
                    break;
                }
            }
        }
    }
}

fn publish(
    state_tx: &watch::Sender<SessionState>,
    next: SessionState,
) {
    state_tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        info!(from = ?*current, to = ?next, "session state changed");
        *current = next;
        true
    });
}
