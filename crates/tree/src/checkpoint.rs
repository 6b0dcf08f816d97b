//! Batch persistence of a version's dirty nodes.
//!
//! `save_version` hands the checkpointer one [`CheckpointBatch`] per
//! version: the dirty leaves and branches (already hashed), the root
//! identity and the orphan log. [`Checkpointer::commit`] writes node
//! records first and the root pointer record last, so a crash between the
//! two leaves the previous version's root intact and never a dangling one.
//!
//! For long-running trees that prefer not to block on storage,
//! [`CheckpointWorker`] runs the same commit on a background thread fed by
//! a channel. Shutdown drains the queue to completion before returning.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::node::{Node, NodeKey};
use crate::store::NodeStore;

/// Everything needed to durably commit one version.
#[derive(Debug, Clone)]
pub struct CheckpointBatch {
    /// The version being committed.
    pub version: i64,
    /// Identity of the version's root; empty sentinel for an empty tree.
    pub root: NodeKey,
    /// The version's dirty nodes, leaves and branches alike.
    pub nodes: Vec<Node>,
    /// Identities superseded by this version.
    pub orphans: Vec<NodeKey>,
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointStats {
    /// Node records written.
    pub nodes_written: u64,
    /// Orphan identities recorded.
    pub orphans_recorded: u64,
}

/// Synchronous batch persister.
pub struct Checkpointer<S: NodeStore> {
    store: S,
}

impl<S: NodeStore> Checkpointer<S> {
    /// Creates a checkpointer writing through `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Durably writes one version.
    ///
    /// Nodes are written in `NodeKey` order for store locality, then the
    /// orphan log, then the root pointer. Nothing is cleaned up on failure;
    /// the caller's in-memory state stays intact for a retry.
    ///
    /// # Errors
    ///
    /// Surfaces the first store error; the root record is not written
    /// unless every node record was.
    pub fn commit(&self, batch: &CheckpointBatch) -> Result<CheckpointStats> {
        let mut ordered: Vec<&Node> = batch.nodes.iter().collect();
        ordered.sort_by_key(|n| n.node_key());

        let nodes_written = ordered.len() as u64;
        for node in ordered {
            self.store.put(node)?;
        }
        self.store.record_orphans(batch.version, &batch.orphans)?;
        self.store.save_root(batch.version, batch.root)?;

        let stats = CheckpointStats {
            nodes_written,
            orphans_recorded: batch.orphans.len() as u64,
        };
        debug!(
            version = batch.version,
            nodes = stats.nodes_written,
            orphans = stats.orphans_recorded,
            "checkpoint committed"
        );
        Ok(stats)
    }
}

/// Background consumer for checkpoint batches.
///
/// The foreground producer enqueues batches with [`submit`](Self::submit);
/// a dedicated thread drains them to the store in order. Versions submitted
/// here become loadable only once their batch has been written — hosts that
/// need `save_version` to imply durability should use the synchronous
/// [`Checkpointer`] instead.
pub struct CheckpointWorker {
    tx: Sender<CheckpointBatch>,
    handle: JoinHandle<Result<()>>,
}

impl CheckpointWorker {
    /// Spawns the worker thread over its own store handle.
    pub fn spawn<S>(store: S) -> Self
    where
        S: NodeStore + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<CheckpointBatch>();
        let handle = thread::Builder::new()
            .name("canopy-checkpoint".to_string())
            .spawn(move || {
                let checkpointer = Checkpointer::new(store);
                // Runs until every sender is dropped, draining the queue.
                for batch in rx {
                    if let Err(err) = checkpointer.commit(&batch) {
                        error!(version = batch.version, %err, "checkpoint failed");
                        return Err(err);
                    }
                }
                Ok(())
            })
            .expect("failed to spawn checkpoint worker thread");
        Self { tx, handle }
    }

    /// Enqueues a batch for background persistence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the worker has stopped (a previous
    /// batch failed to commit).
    pub fn submit(&self, batch: CheckpointBatch) -> Result<()> {
        self.tx.send(batch).map_err(|_| Error::Backend {
            reason: "checkpoint worker has stopped".to_string(),
        })
    }

    /// Drains outstanding batches and stops the worker.
    ///
    /// # Errors
    ///
    /// Surfaces the error that stopped the worker, if any batch failed.
    pub fn shutdown(self) -> Result<()> {
        drop(self.tx);
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Backend { reason: "checkpoint worker panicked".to_string() }),
        }
    }
}
