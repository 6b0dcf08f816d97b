//! The versioned mutation engine.
//!
//! A [`Tree`] is single-writer and not reentrant: one thread calls `set`,
//! `remove` and `save_version` in sequence. Mutations are copy-on-write —
//! touching a committed node records its identity in the orphan log, clears
//! its hash and stamps it with a fresh [`NodeKey`] from the next version.
//! `save_version` hashes the dirty subgraph bottom-up, hands the batch to
//! the checkpointer, and only then advances the committed version, so a
//! failed commit leaves the in-memory tree mutable and retryable.
//!
//! Nodes reference children by identity plus an advisory pool slot. A slot
//! link is honored only while the slot still holds the expected identity;
//! anything else falls back to a store fetch. That lets the pool evict
//! clean leaves at will without back-pointers (see [`crate::pool`]).

mod balance;
mod integrity;

pub use integrity::IntegrityReport;

use std::cmp::Ordering;

use tracing::{debug, info};

use crate::checkpoint::{CheckpointBatch, Checkpointer};
use crate::codec::{self, Hash, EMPTY_HASH};
use crate::error::{Error, Result};
use crate::metrics::TreeMetrics;
use crate::node::{NodeKey, SlotId};
use crate::pool::{NodePool, PoolStats};
use crate::store::NodeStore;

/// Which child of a branch to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    /// The left child.
    Left,
    /// The right child.
    Right,
}

/// Immutable, versioned, authenticated key-value tree.
///
/// See the [crate docs](crate) for the data model. Readers of previously
/// committed versions can run in parallel by opening their own `Tree`
/// against the same store and calling [`load_version`](Self::load_version).
pub struct Tree<S: NodeStore> {
    store: S,
    checkpointer: Checkpointer<S>,
    pool: NodePool,

    /// Last committed version; 0 before the first `save_version`.
    version: i64,
    /// Next sequence number for identities minted in the working version.
    sequence: u32,
    /// Advisory slot of the root node.
    root: Option<SlotId>,
    /// Identity of the root node; empty sentinel when the tree is empty.
    root_key: NodeKey,
    /// Root hash of the last committed version.
    last_root_hash: Hash,

    /// Identities superseded in the working version.
    orphans: Vec<NodeKey>,
    /// Dirty leaves collected by the hash pass (slot ids).
    leaves: Vec<SlotId>,
    /// Dirty branches collected by the hash pass (slot ids).
    branches: Vec<SlotId>,
    /// Approximate bytes held by dirty nodes.
    working_bytes: u64,
    /// Count of dirty nodes.
    working_size: i64,

    metrics: TreeMetrics,
}

impl<S: NodeStore> Tree<S> {
    /// Creates an empty tree at version 0 over `store`, renting node
    /// storage from `pool`.
    pub fn new(store: S, pool: NodePool) -> Self
    where
        S: Clone,
    {
        Self {
            checkpointer: Checkpointer::new(store.clone()),
            store,
            pool,
            version: 0,
            sequence: 0,
            root: None,
            root_key: NodeKey::EMPTY,
            last_root_hash: EMPTY_HASH,
            orphans: Vec::new(),
            leaves: Vec::new(),
            branches: Vec::new(),
            working_bytes: 0,
            working_size: 0,
            metrics: TreeMetrics::default(),
        }
    }

    // ── Read API ────────────────────────────────────────────────────────

    /// Last committed version.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Root hash of the last committed version; [`EMPTY_HASH`] when empty.
    pub fn root_hash(&self) -> Hash {
        self.last_root_hash
    }

    /// Number of keys in the tree, including uncommitted changes.
    ///
    /// # Errors
    ///
    /// Surfaces a store error if the root has to be faulted back in.
    pub fn size(&mut self) -> Result<i64> {
        Ok(match self.root_id()? {
            Some(id) => self.pool.node(id).size,
            None => 0,
        })
    }

    /// Height of the tree counted in nodes: 0 when empty, 1 for a single
    /// leaf.
    ///
    /// # Errors
    ///
    /// Surfaces a store error if the root has to be faulted back in.
    pub fn height(&mut self) -> Result<i8> {
        Ok(match self.root_id()? {
            Some(id) => self.pool.node(id).subtree_height + 1,
            None => 0,
        })
    }

    /// Looks up `key`, reading through to the store for persisted leaf
    /// values.
    ///
    /// # Errors
    ///
    /// Surfaces store errors hit during resolution.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(mut cur) = self.root_id()? else {
            return Ok(None);
        };
        loop {
            let (is_leaf, node_key_bytes) = {
                let n = self.pool.node(cur);
                (n.is_leaf(), n.key.clone())
            };
            if is_leaf {
                if key == node_key_bytes.as_slice() {
                    return self.leaf_value(cur).map(Some);
                }
                return Ok(None);
            }
            let side = if key < node_key_bytes.as_slice() { Side::Left } else { Side::Right };
            cur = self.child(cur, side)?;
        }
    }

    /// Approximate bytes held by the working set of dirty nodes.
    ///
    /// Checkpoint triggering is caller policy; watch this to decide when to
    /// call [`save_version`](Self::save_version).
    pub fn working_bytes(&self) -> u64 {
        self.working_bytes
    }

    /// Number of dirty nodes in the working set.
    pub fn working_size(&self) -> i64 {
        self.working_size
    }

    /// Identities superseded so far in the working version.
    pub fn orphans(&self) -> &[NodeKey] {
        &self.orphans
    }

    /// Mutation and persistence counters.
    pub fn metrics(&self) -> &TreeMetrics {
        &self.metrics
    }

    /// Point-in-time statistics of the node pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    // ── Mutation API ────────────────────────────────────────────────────

    /// Sets `key` to `value` in the working version.
    ///
    /// Returns `true` if the key already existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty value, with the tree
    /// unchanged. Surfaces store errors hit during resolution.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        if value.is_empty() {
            return Err(Error::InvalidInput {
                reason: format!("cannot store an empty value at key {}", hex::encode(key)),
            });
        }
        let updated = match self.root_id()? {
            None => {
                let id = self.new_leaf(key, value);
                self.root = Some(id);
                self.root_key = self.pool.node(id).node_key;
                false
            }
            Some(root) => {
                let (new_root, updated) = self.recursive_set(root, key, value)?;
                self.root = Some(new_root);
                self.root_key = self.pool.node(new_root).node_key;
                updated
            }
        };
        if updated {
            self.metrics.tree_update += 1;
        } else {
            self.metrics.tree_new_node += 1;
        }
        Ok(updated)
    }

    /// Removes `key` from the working version.
    ///
    /// Returns the removed value, or `None` if the key was absent.
    ///
    /// # Errors
    ///
    /// Surfaces store errors hit during resolution.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(root) = self.root_id()? else {
            return Ok(None);
        };
        let (new_root, _, value, removed) = self.recursive_remove(root, key)?;
        if !removed {
            return Ok(None);
        }
        match new_root {
            Some(id) => {
                self.root = Some(id);
                self.root_key = self.pool.node(id).node_key;
            }
            None => {
                self.root = None;
                self.root_key = NodeKey::EMPTY;
            }
        }
        self.metrics.tree_delete += 1;
        Ok(value)
    }

    /// Commits the working version.
    ///
    /// Hashes the dirty subgraph in post-order, persists dirty nodes and
    /// the orphan log, writes the version's root pointer, and returns
    /// `(root_hash, version)`.
    ///
    /// # Errors
    ///
    /// Surfaces the store error on failure. The in-memory tree then still
    /// holds the uncommitted working set and the call can be retried.
    pub fn save_version(&mut self) -> Result<(Hash, i64)> {
        let next_version = self.version + 1;
        self.leaves.clear();
        self.branches.clear();

        let (root_hash, root_key) = match self.root_id()? {
            None => (EMPTY_HASH, NodeKey::EMPTY),
            Some(id) => {
                let hash = self.deep_hash(id)?;
                (hash, self.pool.node(id).node_key)
            }
        };

        let mut nodes = Vec::with_capacity(self.leaves.len() + self.branches.len());
        for &id in self.leaves.iter().chain(self.branches.iter()) {
            nodes.push(self.pool.node(id).clone());
        }
        let batch = CheckpointBatch {
            version: next_version,
            root: root_key,
            nodes,
            orphans: self.orphans.clone(),
        };
        let stats = self.checkpointer.commit(&batch)?;

        // Durable; advance the committed state.
        self.version = next_version;
        self.sequence = 0;
        self.root_key = root_key;
        self.last_root_hash = root_hash;
        self.orphans.clear();
        self.metrics.versions_saved += 1;
        self.metrics.nodes_written += stats.nodes_written;
        for node in &batch.nodes {
            self.metrics.bytes_written += node.size_bytes();
        }

        // Persisted branches stay resident as the clean skeleton; persisted
        // leaves leave the pool and are faulted back in on demand.
        let branches = std::mem::take(&mut self.branches);
        for id in branches {
            self.pool.node_mut(id).dirty = false;
        }
        let leaves = std::mem::take(&mut self.leaves);
        for id in leaves {
            if Some(id) == self.root {
                self.pool.node_mut(id).dirty = false;
                continue;
            }
            self.pool.free(id);
            self.metrics.pool_put += 1;
        }
        self.working_bytes = 0;
        self.working_size = 0;

        debug!(version = next_version, root = %root_key, "version saved");
        Ok((root_hash, next_version))
    }

    /// Restores the tree to committed version `version`.
    ///
    /// Discards any uncommitted working state, resets the pool and loads
    /// the version's root; children materialize lazily on access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] if the version was never
    /// committed to this store.
    pub fn load_version(&mut self, version: i64) -> Result<()> {
        let root_key = self.store.load_root(version)?;

        self.pool.clear();
        self.orphans.clear();
        self.leaves.clear();
        self.branches.clear();
        self.sequence = 0;
        self.working_bytes = 0;
        self.working_size = 0;
        self.version = version;

        if root_key.is_empty() {
            self.root = None;
            self.root_key = NodeKey::EMPTY;
            self.last_root_hash = EMPTY_HASH;
        } else {
            let node = self.store.get(root_key)?;
            self.metrics.store_load += 1;
            self.metrics.pool_get += 1;
            self.last_root_hash = node.hash().ok_or_else(|| Error::Corrupted {
                reason: format!("stored root {root_key} carries no hash"),
            })?;
            let id = self.pool.adopt(node);
            self.root = Some(id);
            self.root_key = root_key;
        }
        info!(version, "loaded version");
        Ok(())
    }

    // ── Node lifecycle ──────────────────────────────────────────────────

    /// Mints the next identity of the working version.
    fn next_node_key(&mut self) -> NodeKey {
        let nk = NodeKey::new(self.version + 1, self.sequence);
        self.sequence += 1;
        nk
    }

    /// Rents a slot and stamps it as a dirty leaf.
    fn new_leaf(&mut self, key: &[u8], value: &[u8]) -> SlotId {
        let id = self.pool.allocate();
        self.metrics.pool_get += 1;
        let nk = self.next_node_key();
        let node = self.pool.node_mut(id);
        node.node_key = nk;
        node.key = key.to_vec();
        node.value = Some(value.to_vec());
        node.subtree_height = 0;
        node.size = 1;
        node.dirty = true;
        let bytes = node.size_bytes();
        self.working_bytes += bytes;
        self.working_size += 1;
        id
    }

    /// Records the node's committed identity in the orphan log.
    ///
    /// No-op for nodes of the working version (including hashed-but-failed
    /// commits): their identities were never reachable from a committed
    /// root. Must run before [`mutate_node`](Self::mutate_node) clears the
    /// hash.
    fn add_orphan(&mut self, id: SlotId) {
        let node = self.pool.node(id);
        if node.hash.is_some() && !node.dirty {
            self.orphans.push(node.node_key);
        }
    }

    /// Copy-on-write touch: clears the hash, stamps a fresh identity and
    /// marks the node dirty. A second touch in the same version is a no-op
    /// (beyond re-clearing a hash left by a failed commit).
    fn mutate_node(&mut self, id: SlotId) {
        let (dirty, has_hash) = {
            let n = self.pool.node(id);
            (n.dirty, n.hash.is_some())
        };
        if dirty {
            if has_hash {
                self.pool.node_mut(id).hash = None;
            }
            return;
        }
        if !has_hash {
            return;
        }
        let nk = self.next_node_key();
        let node = self.pool.node_mut(id);
        node.hash = None;
        node.node_key = nk;
        node.dirty = true;
        let bytes = node.size_bytes();
        self.working_bytes += bytes;
        self.working_size += 1;
    }

    /// Releases a node that dropped out of the tree, orphaning its
    /// committed identity.
    fn return_node(&mut self, id: SlotId) {
        let (committed, dirty, nk, bytes) = {
            let n = self.pool.node(id);
            (n.hash.is_some() && !n.dirty, n.dirty, n.node_key, n.size_bytes())
        };
        if committed {
            self.orphans.push(nk);
        }
        if dirty {
            self.working_bytes = self.working_bytes.saturating_sub(bytes);
            self.working_size -= 1;
        }
        self.pool.free(id);
        self.metrics.pool_put += 1;
    }

    // ── Child resolution ────────────────────────────────────────────────

    /// Heals and returns the root slot, faulting the root back in from the
    /// store if its slot was evicted.
    fn root_id(&mut self) -> Result<Option<SlotId>> {
        let Some(id) = self.root else {
            return Ok(None);
        };
        {
            let n = self.pool.node(id);
            if n.in_use && n.node_key == self.root_key {
                self.pool.mark_accessed(id);
                return Ok(Some(id));
            }
        }
        let node = self.store.get(self.root_key)?;
        self.metrics.store_load += 1;
        self.metrics.pool_get += 1;
        let id = self.pool.adopt(node);
        self.root = Some(id);
        Ok(Some(id))
    }

    /// Resolves a branch's child to a pool slot.
    ///
    /// Honors the advisory slot link only while the slot still holds the
    /// expected identity; otherwise fetches by [`NodeKey`] through the
    /// store and re-links.
    pub(crate) fn child(&mut self, parent: SlotId, side: Side) -> Result<SlotId> {
        let (cached, want, parent_nk) = {
            let n = self.pool.node(parent);
            let (cached, want) = match side {
                Side::Left => (n.left_node, n.left_node_key),
                Side::Right => (n.right_node, n.right_node_key),
            };
            (cached, want, n.node_key)
        };
        if let Some(c) = cached {
            let n = self.pool.node(c);
            if n.in_use && n.node_key == want {
                self.pool.mark_accessed(c);
                return Ok(c);
            }
        }
        if want.is_empty() {
            return Err(Error::Corrupted {
                reason: format!("branch {parent_nk} is missing a child identity"),
            });
        }
        let node = self.store.get(want)?;
        self.metrics.store_load += 1;
        self.metrics.pool_get += 1;
        let c = self.pool.adopt(node);
        // Adoption can evict clean leaves (never branches); only re-link
        // through the parent if its slot still holds the same node.
        let p = self.pool.node_mut(parent);
        if p.in_use && p.node_key == parent_nk {
            match side {
                Side::Left => p.left_node = Some(c),
                Side::Right => p.right_node = Some(c),
            }
        }
        Ok(c)
    }

    /// Points `parent`'s `side` at `child`, tracking identity and hash.
    pub(crate) fn set_side(&mut self, parent: SlotId, side: Side, child: SlotId) {
        let (ck, ch) = {
            let c = self.pool.node(child);
            (c.node_key, c.hash)
        };
        let p = self.pool.node_mut(parent);
        match side {
            Side::Left => {
                p.left_node = Some(child);
                p.left_node_key = ck;
                p.left_hash = ch;
            }
            Side::Right => {
                p.right_node = Some(child);
                p.right_node_key = ck;
                p.right_hash = ch;
            }
        }
    }

    /// Recomputes a branch's height and size from its children.
    pub(crate) fn update_height_size(&mut self, id: SlotId) -> Result<()> {
        let left = self.child(id, Side::Left)?;
        let (lh, ls) = {
            let n = self.pool.node(left);
            (n.subtree_height, n.size)
        };
        let right = self.child(id, Side::Right)?;
        let (rh, rs) = {
            let n = self.pool.node(right);
            (n.subtree_height, n.size)
        };
        let node = self.pool.node_mut(id);
        node.subtree_height = 1 + lh.max(rh);
        node.size = ls + rs;
        Ok(())
    }

    /// Returns a leaf's value, reading through to the store when the value
    /// has been dropped from memory after persistence.
    fn leaf_value(&mut self, id: SlotId) -> Result<Vec<u8>> {
        let (value, nk) = {
            let n = self.pool.node(id);
            debug_assert!(n.is_leaf(), "leaf_value on a branch");
            (n.value.clone(), n.node_key)
        };
        if let Some(v) = value {
            return Ok(v);
        }
        let stored = self.store.get(nk)?;
        self.metrics.store_load += 1;
        stored
            .value()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::Corrupted { reason: format!("leaf record {nk} has no value") })
    }

    // ── Set ─────────────────────────────────────────────────────────────

    fn recursive_set(&mut self, id: SlotId, key: &[u8], value: &[u8]) -> Result<(SlotId, bool)> {
        if self.pool.node(id).is_leaf() {
            // Copy identity and hash out before any allocation: `id` may be
            // a clean leaf, and allocation at the pool cap evicts clean
            // leaves. The links below are built from these copies.
            let (leaf_key, leaf_nk, leaf_hash) = {
                let n = self.pool.node(id);
                (n.key.clone(), n.node_key, n.hash)
            };
            return match key.cmp(leaf_key.as_slice()) {
                Ordering::Less => {
                    // Split: new leaf on the left, existing leaf on the
                    // right; the separator is the smallest key on the right.
                    let parent = self.pool.allocate();
                    self.metrics.pool_get += 1;
                    let parent_nk = self.next_node_key();
                    {
                        let n = self.pool.node_mut(parent);
                        n.node_key = parent_nk;
                        n.key = leaf_key;
                        n.subtree_height = 1;
                        n.size = 2;
                        n.dirty = true;
                    }
                    let new_leaf = self.new_leaf(key, value);
                    self.set_side(parent, Side::Left, new_leaf);
                    {
                        let n = self.pool.node_mut(parent);
                        n.right_node = Some(id);
                        n.right_node_key = leaf_nk;
                        n.right_hash = leaf_hash;
                    }
                    let bytes = self.pool.node(parent).size_bytes();
                    self.working_bytes += bytes;
                    self.working_size += 1;
                    Ok((parent, false))
                }
                Ordering::Greater => {
                    let parent = self.pool.allocate();
                    self.metrics.pool_get += 1;
                    let parent_nk = self.next_node_key();
                    {
                        let n = self.pool.node_mut(parent);
                        n.node_key = parent_nk;
                        n.key = key.to_vec();
                        n.subtree_height = 1;
                        n.size = 2;
                        n.dirty = true;
                        n.left_node = Some(id);
                        n.left_node_key = leaf_nk;
                        n.left_hash = leaf_hash;
                    }
                    let new_leaf = self.new_leaf(key, value);
                    self.set_side(parent, Side::Right, new_leaf);
                    let bytes = self.pool.node(parent).size_bytes();
                    self.working_bytes += bytes;
                    self.working_size += 1;
                    Ok((parent, false))
                }
                Ordering::Equal => {
                    self.add_orphan(id);
                    self.mutate_node(id);
                    let node = self.pool.node_mut(id);
                    let old = node.size_bytes();
                    node.value = Some(value.to_vec());
                    let new = node.size_bytes();
                    self.working_bytes = self.working_bytes - old + new;
                    Ok((id, true))
                }
            };
        }

        self.add_orphan(id);
        self.mutate_node(id);

        let side = if key < self.pool.node(id).key.as_slice() { Side::Left } else { Side::Right };
        let child = self.child(id, side)?;
        let (new_child, updated) = self.recursive_set(child, key, value)?;
        self.set_side(id, side, new_child);

        if updated {
            // Value swap only; shape, heights and sizes are unchanged.
            return Ok((id, true));
        }
        self.update_height_size(id)?;
        let id = self.balance(id)?;
        Ok((id, false))
    }

    // ── Remove ──────────────────────────────────────────────────────────

    /// Removes `key` below `id` and rebalances.
    ///
    /// Returns `(new_self, new_separator, value, removed)`:
    /// - `new_self`: replacement subtree root, `None` when the subtree
    ///   emptied out;
    /// - `new_separator`: when the removed leaf collapsed a branch, the
    ///   separator key the first right-descending ancestor must adopt;
    /// - `value`: the removed leaf's value;
    /// - `removed`: whether the key was found.
    fn recursive_remove(
        &mut self,
        id: SlotId,
        key: &[u8],
    ) -> Result<(Option<SlotId>, Option<Vec<u8>>, Option<Vec<u8>>, bool)> {
        let (is_leaf, node_key_bytes) = {
            let n = self.pool.node(id);
            (n.is_leaf(), n.key.clone())
        };

        if is_leaf {
            if key == node_key_bytes.as_slice() {
                let value = self.leaf_value(id)?;
                self.return_node(id);
                return Ok((None, None, Some(value), true));
            }
            return Ok((Some(id), None, None, false));
        }

        if key < node_key_bytes.as_slice() {
            let child = self.child(id, Side::Left)?;
            let (new_left, new_key, value, removed) = self.recursive_remove(child, key)?;
            if !removed {
                return Ok((Some(id), None, value, false));
            }
            let Some(new_left) = new_left else {
                // The left leaf is gone; the right sibling replaces this
                // branch and the separator propagates up.
                let right = self.child(id, Side::Right)?;
                self.return_node(id);
                return Ok((Some(right), Some(node_key_bytes), value, true));
            };
            self.add_orphan(id);
            self.mutate_node(id);
            self.set_side(id, Side::Left, new_left);
            self.update_height_size(id)?;
            let id = self.balance(id)?;
            return Ok((Some(id), new_key, value, true));
        }

        let child = self.child(id, Side::Right)?;
        let (new_right, new_key, value, removed) = self.recursive_remove(child, key)?;
        if !removed {
            return Ok((Some(id), None, value, false));
        }
        let Some(new_right) = new_right else {
            // The right leaf is gone; the left sibling replaces this branch.
            let left = self.child(id, Side::Left)?;
            self.return_node(id);
            return Ok((Some(left), None, value, true));
        };
        self.add_orphan(id);
        self.mutate_node(id);
        self.set_side(id, Side::Right, new_right);
        if let Some(k) = new_key {
            // A collapse below the right subtree surfaced a new smallest
            // key; it becomes this branch's separator.
            self.pool.node_mut(id).key = k;
        }
        self.update_height_size(id)?;
        let id = self.balance(id)?;
        Ok((Some(id), None, value, true))
    }

    // ── Hashing ─────────────────────────────────────────────────────────

    /// Post-order hash pass over the dirty subgraph.
    ///
    /// Collects dirty leaves and branches into the working-set vectors,
    /// refreshes child identities and hashes on each dirty branch, and
    /// releases clean leaf children back to the pool once their hashes are
    /// captured. Recursion covers the whole dirty subgraph so a batch can
    /// be rebuilt after a failed commit.
    fn deep_hash(&mut self, id: SlotId) -> Result<Hash> {
        {
            let node = self.pool.node(id);
            if !node.dirty {
                return node.hash.ok_or_else(|| Error::Corrupted {
                    reason: format!("clean node {} carries no hash", node.node_key),
                });
            }
        }

        if self.pool.node(id).is_leaf() {
            self.leaves.push(id);
            if self.pool.node(id).hash.is_none() {
                let hash = codec::hash_node(self.pool.node(id))?;
                self.pool.node_mut(id).hash = Some(hash);
            }
            return Ok(self.pool.node(id).hash.expect("hash set above"));
        }

        self.branches.push(id);
        if self.child_needs_hashing(id, Side::Left) {
            let left = self.child(id, Side::Left)?;
            let hash = self.deep_hash(left)?;
            let lk = self.pool.node(left).node_key;
            let node = self.pool.node_mut(id);
            node.left_hash = Some(hash);
            node.left_node_key = lk;
        }
        if self.child_needs_hashing(id, Side::Right) {
            let right = self.child(id, Side::Right)?;
            let hash = self.deep_hash(right)?;
            let rk = self.pool.node(right).node_key;
            let node = self.pool.node_mut(id);
            node.right_hash = Some(hash);
            node.right_node_key = rk;
        }
        if self.pool.node(id).hash.is_none() {
            let hash = codec::hash_node(self.pool.node(id))?;
            self.pool.node_mut(id).hash = Some(hash);
        }

        self.release_clean_leaf_child(id, Side::Left);
        self.release_clean_leaf_child(id, Side::Right);
        Ok(self.pool.node(id).hash.expect("hash set above"))
    }

    /// Whether the hash pass must recurse into a child: either the cached
    /// child hash is gone, or the child subtree still holds dirty nodes
    /// from a commit that failed mid-way (dirty nodes are never evicted,
    /// so their advisory links are authoritative).
    fn child_needs_hashing(&self, id: SlotId, side: Side) -> bool {
        let n = self.pool.node(id);
        let (hash, slot, want) = match side {
            Side::Left => (n.left_hash, n.left_node, n.left_node_key),
            Side::Right => (n.right_hash, n.right_node, n.right_node_key),
        };
        if hash.is_none() {
            return true;
        }
        match slot {
            Some(c) => {
                let child = self.pool.node(c);
                child.in_use && child.node_key == want && child.dirty
            }
            None => false,
        }
    }

    /// Returns a hashed clean leaf child to the pool, keeping resident
    /// memory near the working set. The identity link stays; the leaf is
    /// faulted back in from the store if it is ever needed again.
    fn release_clean_leaf_child(&mut self, id: SlotId, side: Side) {
        let (slot, want) = {
            let n = self.pool.node(id);
            match side {
                Side::Left => (n.left_node, n.left_node_key),
                Side::Right => (n.right_node, n.right_node_key),
            }
        };
        let Some(c) = slot else { return };
        let releasable = {
            let n = self.pool.node(c);
            n.in_use && n.node_key == want && n.is_leaf() && !n.dirty
        };
        if !releasable {
            return;
        }
        self.pool.free(c);
        self.metrics.pool_put += 1;
        let node = self.pool.node_mut(id);
        match side {
            Side::Left => node.left_node = None,
            Side::Right => node.right_node = None,
        }
    }
}
