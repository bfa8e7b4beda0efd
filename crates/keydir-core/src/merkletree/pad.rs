//! Persistent authenticated dictionary
//!
//! Wraps a mutable working tree and the immutable snapshots frozen at each
//! epoch boundary. Snapshots older than the retention window are dropped;
//! the nodes they alone referenced are released with them.

use super::node::LeafEntry;
use super::proof::AuthenticationPath;
use super::tree::{Membership, MerkleTree};
use crate::error::{KeydirError, Result};
use crate::types::{Hash, Index};
use std::collections::BTreeMap;
use tracing::debug;

/// Immutable tree version identified by the epoch it was frozen for
#[derive(Debug, Clone)]
pub struct Snapshot {
    epoch: u64,
    tree: MerkleTree,
}

impl Snapshot {
    pub fn new(epoch: u64, tree: MerkleTree) -> Self {
        Self { epoch, tree }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn root_hash(&self) -> Hash {
        self.tree.root_hash()
    }

    pub fn lookup(&self, index: &Index) -> (Membership, AuthenticationPath) {
        self.tree.lookup(index)
    }
}

/// Working tree plus retained snapshots
#[derive(Debug, Clone)]
pub struct Pad {
    working: MerkleTree,
    snapshots: BTreeMap<u64, Snapshot>,
    latest_epoch: Option<u64>,
    retention_window: u64,
}

impl Pad {
    /// Create an empty PAD retaining the last `retention_window` snapshots
    pub fn new(tree: MerkleTree, retention_window: u64) -> Self {
        Self {
            working: tree,
            snapshots: BTreeMap::new(),
            latest_epoch: None,
            retention_window: retention_window.max(1),
        }
    }

    /// Insert into the working tree, returning its new root
    pub fn insert(&mut self, entry: LeafEntry) -> Result<Hash> {
        self.working = self.working.insert(entry)?;
        Ok(self.working.root_hash())
    }

    /// Look up in the working tree
    pub fn lookup(&self, index: &Index) -> (Membership, AuthenticationPath) {
        self.working.lookup(index)
    }

    /// Root of the working tree
    pub fn root(&self) -> Hash {
        self.working.root_hash()
    }

    pub fn working(&self) -> &MerkleTree {
        &self.working
    }

    pub fn retention_window(&self) -> u64 {
        self.retention_window
    }

    /// Epoch of the most recently published snapshot
    pub fn latest_epoch(&self) -> Option<u64> {
        self.latest_epoch
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest_epoch.and_then(|e| self.snapshots.get(&e))
    }

    /// Oldest snapshot still retained
    pub fn oldest_retained(&self) -> Option<u64> {
        self.snapshots.keys().next().copied()
    }

    /// Snapshot for `epoch`.
    ///
    /// Returns `Ok(None)` when the epoch has fallen out of the retention
    /// window and `EpochNotPublished` when it lies in the future.
    pub fn snapshot(&self, epoch: u64) -> Result<Option<Snapshot>> {
        match self.latest_epoch {
            Some(latest) if epoch <= latest => Ok(self.snapshots.get(&epoch).cloned()),
            _ => Err(KeydirError::EpochNotPublished(epoch)),
        }
    }

    /// Freeze a copy of the working tree as the next epoch without publishing it
    pub fn next_snapshot(&self) -> Snapshot {
        let epoch = self.latest_epoch.map_or(0, |e| e + 1);
        Snapshot::new(epoch, self.working.clone())
    }

    /// Publish `snapshot` as the newest epoch and make its tree the working base.
    ///
    /// Fails with `OutOfOrderEpoch` unless the snapshot directly follows the
    /// latest published epoch.
    pub fn publish(&mut self, snapshot: Snapshot) -> Result<()> {
        let expected = self.latest_epoch.map_or(0, |e| e + 1);
        if snapshot.epoch != expected {
            return Err(KeydirError::OutOfOrderEpoch {
                expected,
                actual: snapshot.epoch,
            });
        }

        self.working = snapshot.tree.clone();
        self.latest_epoch = Some(snapshot.epoch);
        self.snapshots.insert(snapshot.epoch, snapshot);
        self.prune();
        Ok(())
    }

    /// Freeze the working tree as the next epoch
    pub fn advance_epoch(&mut self) -> Result<Snapshot> {
        let snapshot = self.next_snapshot();
        self.publish(snapshot.clone())?;
        Ok(snapshot)
    }

    fn prune(&mut self) {
        let Some(latest) = self.latest_epoch else {
            return;
        };
        let keep_from = (latest + 1).saturating_sub(self.retention_window);
        let retained = self.snapshots.split_off(&keep_from);
        let dropped = std::mem::replace(&mut self.snapshots, retained);
        if !dropped.is_empty() {
            debug!(
                dropped = dropped.len(),
                oldest_retained = keep_from,
                "Pruned snapshots outside retention window"
            );
        }
    }
}
