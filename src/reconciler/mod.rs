//! Snapshot-and-rewrite of the topology file.
//!
//! Every pass re-reads the whole subtree; nothing is diffed or cached
//! between passes. A pass either writes a complete file or writes nothing.
//!
//! Signals are processed one at a time. A pass runs inside
//! `reconcile(&mut self)`, so the borrow itself is the Reconciling state and
//! passes can never overlap. Signals that arrive while a pass is running are
//! collapsed into a single follow-up pass.


use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::child_path;
use crate::AddressResolver;
use crate::ChangeSignal;
use crate::CoordinationClient;
use crate::RackAssignment;
use crate::Result;
use crate::TopologySnapshot;
use crate::TopologyWriter;
use crate::ZNode;

pub struct Reconciler {
    client: Arc<dyn CoordinationClient>,
    resolver: Arc<dyn AddressResolver>,
    base_path: String,
    writer: TopologyWriter,
    completed_passes: u64,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        resolver: Arc<dyn AddressResolver>,
        base_path: impl Into<String>,
        writer: TopologyWriter,
    ) -> Self {
        Self {
            client,
            resolver,
            base_path: base_path.into(),
            writer,
            completed_passes: 0,
        }
    }

    pub fn completed_passes(&self) -> u64 {
        self.completed_passes
    }

    /// Processes signals until the channel closes or a pass fails.
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<ChangeSignal>,
    ) -> Result<()> {
        while let Some(signal) = signals.recv().await {
            debug!(kind = ?signal.kind, path = ?signal.path, "change signal received");
            self.reconcile().await?;

            loop {
                let coalesced = drain(&mut signals);
                if coalesced == 0 {
                    break;
                }
                debug!(coalesced, "signals received during pass, running one follow-up pass");
                self.reconcile().await?;
            }
        }

        info!("change signal channel closed, reconciler stopping");
        Ok(())
    }

    /// Runs one full pass and writes the result.
    ///
    /// # Errors
    /// Any listing, fetch, resolution or write failure aborts the pass; the
    /// topology file is left untouched in every case but a failed write.
    pub async fn reconcile(&mut self) -> Result<TopologySnapshot> {
        let result = self.pass().await;

        match &result {
            Ok(snapshot) => {
                self.completed_passes += 1;
                info!(
                    pass = self.completed_passes,
                    entries = snapshot.len(),
                    "reconciliation pass completed"
                );
            }
            Err(e) => error!(kind = e.kind(), error = %e, "reconciliation pass aborted"),
        }
        result
    }

    async fn pass(&self) -> Result<TopologySnapshot> {
        let names = self.client.list_children(&self.base_path).await?;

        let mut nodes = Vec::with_capacity(names.len());
        for name in names {
            let value = self.client.get_data(&child_path(&self.base_path, &name)).await?;
            nodes.push(ZNode::new(name, value));
        }

        let mut assignments = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let address = self.resolver.resolve(&node.name).await?;
            assignments.push(RackAssignment::new(address, node.rack_id()));
        }

        let snapshot = TopologySnapshot::new(assignments);
        self.writer.write(&snapshot)?;
        Ok(snapshot)
    }
}

/// Empties the channel without blocking, returning how many signals it held.
fn drain(signals: &mut mpsc::Receiver<ChangeSignal>) -> usize {
    let mut count = 0;
    loop {
        match signals.try_recv() {
            Ok(_) => count += 1,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return count,
        }
    }
}
