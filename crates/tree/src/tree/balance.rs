//! AVL rebalancing.
//!
//! Standard single and double rotations, copy-on-write: every branch a
//! rotation restructures is touched (orphaned and restamped) first.
//! Balance factor is `height(left) - height(right)`; a committed tree
//! keeps it within `[-1, 1]`.

use super::{Side, Tree};
use crate::error::Result;
use crate::node::SlotId;
use crate::store::NodeStore;

impl<S: NodeStore> Tree<S> {
    /// `height(left) - height(right)` of the branch in `id`.
    fn balance_factor(&mut self, id: SlotId) -> Result<i32> {
        let left = self.child(id, Side::Left)?;
        let lh = i32::from(self.pool.node(left).subtree_height);
        let right = self.child(id, Side::Right)?;
        let rh = i32::from(self.pool.node(right).subtree_height);
        Ok(lh - rh)
    }

    /// Restores the AVL invariant at `id` after a child changed height.
    ///
    /// `+2` means left-heavy: rotate right, preceded by a left rotation of
    /// the left child when that child leans right (double rotation).
    /// Mirrored for `-2`.
    pub(crate) fn balance(&mut self, id: SlotId) -> Result<SlotId> {
        let bf = self.balance_factor(id)?;
        if bf > 1 {
            let left = self.child(id, Side::Left)?;
            if self.balance_factor(left)? < 0 {
                let new_left = self.rotate_left(left)?;
                self.set_side(id, Side::Left, new_left);
            }
            return self.rotate_right(id);
        }
        if bf < -1 {
            let right = self.child(id, Side::Right)?;
            if self.balance_factor(right)? > 0 {
                let new_right = self.rotate_right(right)?;
                self.set_side(id, Side::Right, new_right);
            }
            return self.rotate_left(id);
        }
        Ok(id)
    }

    /// Left rotation around `id`; the right child becomes the subtree root.
    fn rotate_left(&mut self, id: SlotId) -> Result<SlotId> {
        self.add_orphan(id);
        self.mutate_node(id);
        let pivot = self.child(id, Side::Right)?;
        self.add_orphan(pivot);
        self.mutate_node(pivot);

        let inner = self.child(pivot, Side::Left)?;
        self.set_side(id, Side::Right, inner);
        self.set_side(pivot, Side::Left, id);

        self.update_height_size(id)?;
        self.update_height_size(pivot)?;
        Ok(pivot)
    }

    /// Right rotation around `id`; the left child becomes the subtree root.
    fn rotate_right(&mut self, id: SlotId) -> Result<SlotId> {
        self.add_orphan(id);
        self.mutate_node(id);
        let pivot = self.child(id, Side::Left)?;
        self.add_orphan(pivot);
        self.mutate_node(pivot);

        let inner = self.child(pivot, Side::Right)?;
        self.set_side(id, Side::Left, inner);
        self.set_side(pivot, Side::Right, id);

        self.update_height_size(id)?;
        self.update_height_size(pivot)?;
        Ok(pivot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::Tree;
    use crate::pool::NodePool;
    use crate::store::{KvNodeStore, MemoryBackend};

    fn new_tree() -> Tree<KvNodeStore<MemoryBackend>> {
        let store = KvNodeStore::new(Arc::new(MemoryBackend::new()));
        Tree::new(store, NodePool::new())
    }

    /// Walks every branch and asserts the AVL and size/height sums hold.
    fn assert_balanced(tree: &mut Tree<KvNodeStore<MemoryBackend>>) {
        tree.save_version().unwrap();
        tree.verify_integrity().unwrap();
    }

    #[test]
    fn test_ascending_inserts_stay_balanced() {
        let mut tree = new_tree();
        for i in 0..64u8 {
            tree.set(&[i], b"v").unwrap();
        }
        assert_eq!(tree.size().unwrap(), 64);
        // A perfectly balanced 64-leaf tree has subtree height 6.
        assert_eq!(tree.height().unwrap(), 7);
        assert_balanced(&mut tree);
    }

    #[test]
    fn test_descending_inserts_stay_balanced() {
        let mut tree = new_tree();
        for i in (0..64u8).rev() {
            tree.set(&[i], b"v").unwrap();
        }
        assert_eq!(tree.size().unwrap(), 64);
        assert_eq!(tree.height().unwrap(), 7);
        assert_balanced(&mut tree);
    }

    #[test]
    fn test_zigzag_inserts_trigger_double_rotations() {
        let mut tree = new_tree();
        // Low, high, middle ordering repeatedly forces left-right and
        // right-left shapes.
        for i in 0..32u8 {
            tree.set(&[i], b"v").unwrap();
            tree.set(&[255 - i], b"v").unwrap();
            tree.set(&[128u8.wrapping_add(i)], b"v").unwrap();
        }
        assert_eq!(tree.size().unwrap(), 96);
        assert_balanced(&mut tree);
    }

    #[test]
    fn test_removals_stay_balanced() {
        let mut tree = new_tree();
        for i in 0..64u8 {
            tree.set(&[i], b"v").unwrap();
        }
        // Carve out every other key, then a contiguous run.
        for i in (0..64u8).step_by(2) {
            assert!(tree.remove(&[i]).unwrap().is_some());
        }
        for i in 33..48u8 {
            tree.remove(&[i]).unwrap();
        }
        assert_balanced(&mut tree);
    }

    #[test]
    fn test_mixed_churn_stays_balanced() {
        let mut tree = new_tree();
        for round in 0..8u8 {
            for i in 0..32u8 {
                tree.set(&[i], &[round, i]).unwrap();
            }
            for i in (0..32u8).step_by(3) {
                tree.remove(&[i]).unwrap();
            }
            assert_balanced(&mut tree);
        }
    }
}
