//! Committed-tree verification.
//!
//! Walks the whole tree, recomputing every hash strictly bottom-up and
//! re-checking the structural invariants: BST ordering with
//! separator-equals-smallest-right-key, AVL balance, and height/size sums.
//! Meant for tests, audits and corruption triage; it faults in every node,
//! so expect it to thrash the pool on big trees.

use super::{Side, Tree};
use crate::codec::{self, Hash, EMPTY_HASH};
use crate::error::{Error, Result};
use crate::node::{NodeKey, SlotId};
use crate::store::NodeStore;

/// Result of a full-tree verification walk.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Total nodes visited.
    pub nodes: u64,
    /// Leaves visited.
    pub leaves: u64,
    /// Keys in the tree (the root's size).
    pub size: i64,
    /// Tree height counted in nodes.
    pub height: i8,
    /// Strictly recomputed root hash.
    pub root_hash: Hash,
}

impl<S: NodeStore> Tree<S> {
    /// Verifies the committed tree bottom-up.
    ///
    /// Recomputes every node hash from scratch, confirms it matches the
    /// recorded hash, and re-checks BST order, balance factors and
    /// height/size sums. The recomputed root hash must equal the hash
    /// returned by the last `save_version`/`load_version`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if there are uncommitted changes,
    /// and [`Error::Corrupted`] describing the first violated invariant.
    pub fn verify_integrity(&mut self) -> Result<IntegrityReport> {
        let Some(root) = self.root_id()? else {
            return Ok(IntegrityReport {
                nodes: 0,
                leaves: 0,
                size: 0,
                height: 0,
                root_hash: EMPTY_HASH,
            });
        };
        if self.pool.node(root).dirty {
            return Err(Error::InvalidInput {
                reason: "cannot verify a tree with uncommitted changes".to_string(),
            });
        }

        let mut report = IntegrityReport {
            nodes: 0,
            leaves: 0,
            size: 0,
            height: 0,
            root_hash: EMPTY_HASH,
        };
        let (hash, height, size, _min) = self.verify_subtree(root, None, None, &mut report)?;
        if hash != self.last_root_hash {
            return Err(Error::Corrupted {
                reason: format!(
                    "recomputed root hash {} does not match committed {}",
                    hex::encode(hash),
                    hex::encode(self.last_root_hash)
                ),
            });
        }
        report.root_hash = hash;
        report.height = height + 1;
        report.size = size;
        Ok(report)
    }

    /// Enumerates the identities of every node reachable from the current
    /// root, pre-order.
    ///
    /// # Errors
    ///
    /// Surfaces store errors hit while materializing children.
    pub fn node_keys(&mut self) -> Result<Vec<NodeKey>> {
        let mut keys = Vec::new();
        if let Some(root) = self.root_id()? {
            self.collect_node_keys(root, &mut keys)?;
        }
        Ok(keys)
    }

    fn collect_node_keys(&mut self, id: SlotId, out: &mut Vec<NodeKey>) -> Result<()> {
        let (nk, is_leaf) = {
            let n = self.pool.node(id);
            (n.node_key, n.is_leaf())
        };
        out.push(nk);
        if !is_leaf {
            let left = self.child(id, Side::Left)?;
            self.collect_node_keys(left, out)?;
            let right = self.child(id, Side::Right)?;
            self.collect_node_keys(right, out)?;
        }
        Ok(())
    }

    /// Returns `(hash, subtree_height, size, min_key)` of the verified
    /// subtree. `lower`/`upper` are the separator bounds inherited from
    /// ancestors: every leaf key must satisfy `lower <= key < upper`.
    fn verify_subtree(
        &mut self,
        id: SlotId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        report: &mut IntegrityReport,
    ) -> Result<(Hash, i8, i64, Vec<u8>)> {
        let (nk, key, height, size, recorded_hash, is_leaf) = {
            let n = self.pool.node(id);
            (n.node_key, n.key.clone(), n.subtree_height, n.size, n.hash, n.is_leaf())
        };
        report.nodes += 1;

        if is_leaf {
            report.leaves += 1;
            if size != 1 {
                return Err(Error::Corrupted { reason: format!("leaf {nk} has size {size}") });
            }
            if let Some(lower) = lower {
                if key.as_slice() < lower {
                    return Err(Error::Corrupted {
                        reason: format!("leaf {nk} violates its lower bound"),
                    });
                }
            }
            if let Some(upper) = upper {
                if key.as_slice() >= upper {
                    return Err(Error::Corrupted {
                        reason: format!("leaf {nk} violates its upper bound"),
                    });
                }
            }
            let value = self.leaf_value(id)?;
            let hash = codec::leaf_hash(&key, &value);
            if recorded_hash != Some(hash) {
                return Err(Error::Corrupted {
                    reason: format!("leaf {nk} hash does not match its content"),
                });
            }
            return Ok((hash, 0, 1, key));
        }

        let left = self.child(id, Side::Left)?;
        let (left_hash, lh, ls, left_min) =
            self.verify_subtree(left, lower, Some(key.as_slice()), report)?;
        let right = self.child(id, Side::Right)?;
        let (right_hash, rh, rs, right_min) =
            self.verify_subtree(right, Some(key.as_slice()), upper, report)?;

        if right_min != key {
            return Err(Error::Corrupted {
                reason: format!("branch {nk} separator is not the smallest key on its right"),
            });
        }
        if height != 1 + lh.max(rh) {
            return Err(Error::Corrupted {
                reason: format!("branch {nk} height {height} != 1 + max({lh}, {rh})"),
            });
        }
        if size != ls + rs {
            return Err(Error::Corrupted {
                reason: format!("branch {nk} size {size} != {ls} + {rs}"),
            });
        }
        let bf = i32::from(lh) - i32::from(rh);
        if !(-1..=1).contains(&bf) {
            return Err(Error::Corrupted {
                reason: format!("branch {nk} balance factor {bf} out of range"),
            });
        }

        let hash = codec::branch_hash(height, size, &key, &left_hash, &right_hash);
        if recorded_hash != Some(hash) {
            return Err(Error::Corrupted {
                reason: format!("branch {nk} hash does not match its children"),
            });
        }
        Ok((hash, height, size, left_min))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::Tree;
    use super::*;
    use crate::pool::NodePool;
    use crate::store::{KvNodeStore, MemoryBackend};

    fn new_tree() -> Tree<KvNodeStore<MemoryBackend>> {
        let store = KvNodeStore::new(Arc::new(MemoryBackend::new()));
        Tree::new(store, NodePool::new())
    }

    #[test]
    fn test_verify_empty_tree() {
        let mut tree = new_tree();
        let report = tree.verify_integrity().unwrap();
        assert_eq!(report.nodes, 0);
        assert_eq!(report.root_hash, EMPTY_HASH);
    }

    #[test]
    fn test_verify_committed_tree() {
        let mut tree = new_tree();
        for i in 0..40u8 {
            tree.set(&[i], &[i]).unwrap();
        }
        let (hash, _) = tree.save_version().unwrap();

        let report = tree.verify_integrity().unwrap();
        assert_eq!(report.root_hash, hash);
        assert_eq!(report.size, 40);
        assert_eq!(report.leaves, 40);
        // A tree with n leaves has n - 1 branches.
        assert_eq!(report.nodes, 79);
        assert_eq!(report.height, tree.height().unwrap());
    }

    #[test]
    fn test_verify_rejects_uncommitted_changes() {
        let mut tree = new_tree();
        tree.set(b"a", b"1").unwrap();
        match tree.verify_integrity() {
            Err(Error::InvalidInput { .. }) => {}
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_node_keys_enumerates_whole_tree() {
        let mut tree = new_tree();
        for i in 0..10u8 {
            tree.set(&[i], &[i]).unwrap();
        }
        tree.save_version().unwrap();

        let keys = tree.node_keys().unwrap();
        // 10 leaves + 9 branches, all distinct.
        assert_eq!(keys.len(), 19);
        let mut deduped = keys.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), keys.len());
        assert!(keys.iter().all(|nk| nk.version() == 1));
    }

    #[test]
    fn test_verify_after_reload() {
        let mut tree = new_tree();
        for i in 0..25u8 {
            tree.set(&[i], &[i, i]).unwrap();
        }
        let (hash, version) = tree.save_version().unwrap();

        tree.load_version(version).unwrap();
        let report = tree.verify_integrity().unwrap();
        assert_eq!(report.root_hash, hash);
        assert_eq!(report.size, 25);
    }
}
