//! Wires the engine together and owns the termination policy.
//!
//! Connect, then run the tree watcher and the reconciler as two tasks joined
//! by one bounded channel. The first task to fail ends the run with its
//! error; a shutdown signal ends it cleanly.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::error;
use tracing::info;

use crate::AddressResolver;
use crate::ConnectionManager;
use crate::Connector;
use crate::Error;
use crate::RackSyncConfig;
use crate::Reconciler;
use crate::Result;
use crate::TopologyWriter;
use crate::TreeWatcher;

pub struct RackSync {
    config: RackSyncConfig,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn AddressResolver>,
}

impl RackSync {
    pub fn new(
        config: RackSyncConfig,
        connector: Arc<dyn Connector>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            config,
            connector,
            resolver,
        }
    }

    /// Runs until a fatal error or until `shutdown` fires.
    ///
    /// Returns `Ok(())` only for a requested shutdown; dropping the sender
    /// side of `shutdown` is fatal.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let coordination = &self.config.coordination;
        let manager = ConnectionManager::new(self.connector.clone(), self.config.retry.connect);

        let session = tokio::select! {
            changed = shutdown.changed() => {
                shutdown_requested(changed)?;
                info!("shutdown requested before a session was established");
                return Ok(());
            }
            session = manager.connect(&coordination.endpoint) => session?,
        };

        let (signal_tx, signal_rx) = mpsc::channel(self.config.watcher.signal_buffer);
        let watcher = TreeWatcher::new(
            session.client(),
            session.subscribe(),
            coordination.base_path.clone(),
            signal_tx,
        );
        let reconciler = Reconciler::new(
            session.client(),
            self.resolver.clone(),
            coordination.base_path.clone(),
            TopologyWriter::new(self.config.topology.output_path.clone()),
        );

        info!(
            base_path = %coordination.base_path,
            output = ?self.config.topology.output_path,
            "rack sync started"
        );

        let mut watcher_handle = tokio::spawn(watcher.run());
        let mut reconciler_handle = tokio::spawn(reconciler.run(signal_rx));

        let result = tokio::select! {
            biased;
            changed = shutdown.changed() => shutdown_requested(changed).map(|()| info!("shutdown requested")),
            res = &mut watcher_handle => flatten(res),
            res = &mut reconciler_handle => match flatten(res) {
                // The reconciler only ends cleanly once the watcher dropped
                // its sender, so the watcher holds the real outcome.
                Ok(()) => match flatten((&mut watcher_handle).await) {
                    Ok(()) => Err(Error::Fatal("tree watcher stopped unexpectedly".to_string())),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            },
        };

        watcher_handle.abort();
        reconciler_handle.abort();
        drop(session);

        if let Err(e) = &result {
            error!(kind = e.kind(), error = %e, "rack sync stopped");
        }
        result
    }
}

/// Only an explicit send counts as a shutdown request. A dropped sender
/// means the signal source is gone and nothing could stop the run cleanly.
fn shutdown_requested(changed: std::result::Result<(), watch::error::RecvError>) -> Result<()> {
    changed.map_err(|_| Error::Fatal("shutdown signal source went away".to_string()))
}

fn flatten(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    res?
}
