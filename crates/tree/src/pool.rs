//! Fixed-slot arena owning all in-memory node storage.
//!
//! Slots are indexed by [`SlotId`]. A free list governs allocation and
//! reclamation, both O(1). When the free list runs dry the pool doubles,
//! up to the configured cap; at the cap it first tries to evict a clean
//! leaf using a clock sweep (approximate LRU). Dirty nodes are never
//! evicted — they exist nowhere but here until the next checkpoint — so
//! when everything resident is dirty the cap is allowed to stretch rather
//! than lose state.
//!
//! Only leaves are eviction candidates. Clean branches form the resident
//! skeleton of the tree and stay put until the tree itself releases them;
//! a clean leaf is always recoverable from the store through its identity.

use std::collections::VecDeque;

use tracing::warn;

use crate::node::{Node, SlotId};

/// Configuration for a [`NodePool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of slots to pre-allocate.
    pub initial_slots: usize,
    /// Soft cap on resident slots. `None` = grow freely.
    pub max_slots: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { initial_slots: 1024, max_slots: None }
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total slots allocated.
    pub slots: usize,
    /// Slots currently on the free list.
    pub free: usize,
    /// Resident dirty nodes.
    pub dirty: usize,
    /// Clean nodes evicted since creation.
    pub evictions: u64,
    /// Times the slot array grew.
    pub grows: u64,
}

/// The node arena.
pub struct NodePool {
    slots: Vec<Node>,
    free: VecDeque<SlotId>,
    clock_hand: usize,
    max_slots: Option<usize>,
    evictions: u64,
    grows: u64,
}

impl NodePool {
    /// Creates a pool with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a pool with the given configuration.
    pub fn with_config(config: PoolConfig) -> Self {
        let mut pool = Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            clock_hand: 0,
            max_slots: config.max_slots,
            evictions: 0,
            grows: 0,
        };
        pool.grow(config.initial_slots.max(1));
        pool
    }

    /// Hands out a reset slot, growing or evicting as needed.
    ///
    /// The returned slot is marked in use; the caller stamps identity and
    /// contents. Panics if the slot taken from the free list was not fully
    /// reset — that would mean a reclamation bug, not a caller error.
    pub fn allocate(&mut self) -> SlotId {
        if self.free.is_empty() {
            let at_cap = self.max_slots.is_some_and(|max| self.slots.len() >= max);
            if at_cap {
                if let Some(victim) = self.evict_one() {
                    self.free.push_back(victim);
                } else {
                    // Everything resident is dirty or pinned by residency
                    // rules; stretch the cap instead of losing state.
                    warn!(
                        slots = self.slots.len(),
                        "node pool exceeding its cap; no clean leaf to evict"
                    );
                    let len = self.slots.len();
                    self.grow(len);
                }
            } else {
                let len = self.slots.len();
                self.grow(len);
            }
        }

        let id = self.free.pop_front().expect("free list replenished above");
        let node = &mut self.slots[id];
        assert!(node.hash.is_none(), "free slot must have no hash");
        assert!(!node.dirty && !node.in_use, "free slot must be reset");
        node.in_use = true;
        node.accessed = true;
        id
    }

    /// Moves an already-built node (typically decoded from the store) into
    /// a slot and returns its id.
    pub fn adopt(&mut self, node: Node) -> SlotId {
        let id = self.allocate();
        let slot = &mut self.slots[id];
        *slot = node;
        slot.in_use = true;
        slot.accessed = true;
        id
    }

    /// Resets a slot and returns it to the free list.
    pub fn free(&mut self, id: SlotId) {
        self.slots[id].reset();
        self.free.push_back(id);
    }

    /// Appends `n` empty slots.
    pub fn grow(&mut self, n: usize) {
        let start = self.slots.len();
        self.slots.reserve(n);
        for id in start..start + n {
            self.slots.push(Node::default());
            self.free.push_back(id);
        }
        self.grows += 1;
        if self.max_slots.is_some_and(|max| self.slots.len() > max) {
            warn!(slots = self.slots.len(), "node pool grew past its cap");
        }
    }

    /// Borrows the node in `id`.
    pub fn node(&self, id: SlotId) -> &Node {
        &self.slots[id]
    }

    /// Mutably borrows the node in `id`.
    pub fn node_mut(&mut self, id: SlotId) -> &mut Node {
        &mut self.slots[id]
    }

    /// Gives `id` a second chance in the eviction clock.
    pub fn mark_accessed(&mut self, id: SlotId) {
        self.slots[id].accessed = true;
    }

    /// Evicts one clean, unreferenced-by-necessity leaf via the clock sweep.
    ///
    /// Returns the reclaimed slot, or `None` when no resident node is
    /// evictable. Never touches dirty nodes or branches.
    fn evict_one(&mut self) -> Option<SlotId> {
        let len = self.slots.len();
        if len == 0 {
            return None;
        }
        // Two sweeps: the first clears accessed bits, the second evicts.
        let mut iterations = 0;
        let max_iterations = len * 2;
        while iterations < max_iterations {
            if self.clock_hand >= len {
                self.clock_hand = 0;
            }
            let id = self.clock_hand;
            self.clock_hand += 1;
            iterations += 1;

            let node = &mut self.slots[id];
            let evictable =
                node.in_use && !node.dirty && node.hash.is_some() && node.is_leaf();
            if !evictable {
                continue;
            }
            if node.accessed {
                node.accessed = false;
                continue;
            }
            node.reset();
            self.evictions += 1;
            return Some(id);
        }
        None
    }

    /// Resets every slot and rebuilds the free list.
    ///
    /// Used when the owning tree discards its working state wholesale
    /// (e.g. on `load_version`).
    pub fn clear(&mut self) {
        for node in &mut self.slots {
            node.reset();
        }
        self.free.clear();
        self.free.extend(0..self.slots.len());
        self.clock_hand = 0;
    }

    /// Total slot count.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool has no slots (never true after construction).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots currently free.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Returns point-in-time statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            slots: self.slots.len(),
            free: self.free.len(),
            dirty: self.slots.iter().filter(|n| n.dirty).count(),
            evictions: self.evictions,
            grows: self.grows,
        }
    }
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::leaf_hash;
    use crate::node::NodeKey;

    fn small_pool(initial: usize, max: Option<usize>) -> NodePool {
        NodePool::with_config(PoolConfig { initial_slots: initial, max_slots: max })
    }

    /// Stamps a slot as a clean persisted leaf (eviction candidate).
    fn make_clean_leaf(pool: &mut NodePool, id: SlotId, seq: u32) {
        let node = pool.node_mut(id);
        node.node_key = NodeKey::new(1, seq);
        node.key = vec![seq as u8];
        node.value = Some(vec![seq as u8]);
        node.hash = Some(leaf_hash(&node.key, &[seq as u8]));
    }

    /// Stamps a slot as a dirty working leaf (pinned).
    fn make_dirty_leaf(pool: &mut NodePool, id: SlotId, seq: u32) {
        let node = pool.node_mut(id);
        node.node_key = NodeKey::new(1, seq);
        node.dirty = true;
    }

    #[test]
    fn test_allocate_and_free_reuses_slots() {
        let mut pool = small_pool(2, None);
        let a = pool.allocate();
        let b = pool.allocate();
        assert_ne!(a, b);
        assert_eq!(pool.free_count(), 0);

        pool.free(a);
        assert_eq!(pool.free_count(), 1);
        let c = pool.allocate();
        assert_eq!(c, a);
    }

    #[test]
    fn test_grow_doubles_when_exhausted() {
        let mut pool = small_pool(2, None);
        pool.allocate();
        pool.allocate();
        assert_eq!(pool.len(), 2);

        // Third allocation forces a doubling grow.
        pool.allocate();
        assert_eq!(pool.len(), 4);
        assert!(pool.stats().grows >= 2);
    }

    #[test]
    fn test_allocate_returns_reset_slot() {
        let mut pool = small_pool(1, None);
        let id = pool.allocate();
        make_dirty_leaf(&mut pool, id, 0);
        pool.node_mut(id).dirty = false;
        pool.free(id);

        let id = pool.allocate();
        let node = pool.node(id);
        assert!(node.hash.is_none());
        assert!(node.node_key.is_empty());
        assert!(node.in_use);
    }

    #[test]
    fn test_eviction_reclaims_clean_leaf_at_cap() {
        let mut pool = small_pool(2, Some(2));
        let a = pool.allocate();
        let b = pool.allocate();
        make_clean_leaf(&mut pool, a, 0);
        make_dirty_leaf(&mut pool, b, 1);

        // At cap with one clean leaf: allocation evicts it rather than grow.
        let c = pool.allocate();
        assert_eq!(c, a);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().evictions, 1);
    }

    #[test]
    fn test_dirty_nodes_never_evicted() {
        let mut pool = small_pool(2, Some(2));
        let a = pool.allocate();
        let b = pool.allocate();
        make_dirty_leaf(&mut pool, a, 0);
        make_dirty_leaf(&mut pool, b, 1);

        // All dirty: pool must stretch past the cap, not evict.
        let _c = pool.allocate();
        assert!(pool.len() > 2);
        assert_eq!(pool.stats().evictions, 0);
        assert!(pool.node(a).dirty && pool.node(b).dirty);
    }

    #[test]
    fn test_branches_never_evicted() {
        let mut pool = small_pool(2, Some(2));
        let a = pool.allocate();
        let b = pool.allocate();
        // A clean branch: persisted, not dirty, but height > 0.
        make_clean_leaf(&mut pool, a, 0);
        let node = pool.node_mut(a);
        node.subtree_height = 1;
        make_dirty_leaf(&mut pool, b, 1);

        let _c = pool.allocate();
        assert!(pool.len() > 2, "branch must not be evicted");
        assert_eq!(pool.stats().evictions, 0);
    }

    #[test]
    fn test_clock_gives_second_chance() {
        let mut pool = small_pool(3, Some(3));
        let ids: Vec<_> = (0..3).map(|_| pool.allocate()).collect();
        for (seq, &id) in ids.iter().enumerate() {
            make_clean_leaf(&mut pool, id, seq as u32);
        }
        // Re-mark the first leaf; the sweep should prefer another victim
        // after the initial accessed bits age out.
        pool.mark_accessed(ids[0]);

        let _ = pool.allocate();
        assert_eq!(pool.stats().evictions, 1);
    }

    #[test]
    fn test_adopt_places_node() {
        let mut pool = small_pool(2, None);
        let node = Node {
            node_key: NodeKey::new(4, 2),
            key: b"k".to_vec(),
            value: Some(b"v".to_vec()),
            size: 1,
            hash: Some(leaf_hash(b"k", b"v")),
            ..Node::default()
        };
        let id = pool.adopt(node);
        assert_eq!(pool.node(id).node_key, NodeKey::new(4, 2));
        assert!(pool.node(id).in_use);
    }

    #[test]
    fn test_clear_resets_all_slots() {
        let mut pool = small_pool(4, None);
        let a = pool.allocate();
        make_dirty_leaf(&mut pool, a, 0);

        pool.clear();
        assert_eq!(pool.free_count(), pool.len());
        assert!(!pool.node(a).in_use);
        assert_eq!(pool.stats().dirty, 0);
    }

    #[test]
    fn test_stats_counts_dirty() {
        let mut pool = small_pool(4, None);
        let a = pool.allocate();
        let _b = pool.allocate();
        make_dirty_leaf(&mut pool, a, 0);

        let stats = pool.stats();
        assert_eq!(stats.slots, 4);
        assert_eq!(stats.free, 2);
        assert_eq!(stats.dirty, 1);
    }
}
