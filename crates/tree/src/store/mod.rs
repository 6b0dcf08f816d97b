//! Persistence abstraction for the tree engine.
//!
//! The engine consumes a narrow [`NodeStore`] capability set: put, get and
//! delete of node records, plus the version→root pointer records and the
//! per-version orphan log. [`KvNodeStore`] satisfies it on top of any
//! durable byte-level map implementing [`KvBackend`] — the engine needs no
//! ordering, iteration or transaction primitives from the backend.
//!
//! # Persisted artifacts
//!
//! | record | key | value |
//! |---|---|---|
//! | node | 12-byte [`NodeKey`](crate::node::NodeKey) encoding | canonical node bytes |
//! | root | `root\|` + big-endian i64 version | 12-byte root `NodeKey` |
//! | orphans | `orphan\|` + big-endian i64 version | concatenated 12-byte `NodeKey`s |
//!
//! The 13-byte root keys and longer orphan keys cannot collide with the
//! fixed 12-byte node keys.

mod memory;

pub use memory::MemoryBackend;

use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};

use crate::codec;
use crate::error::{Error, Result};
use crate::node::{Node, NodeKey, NODE_KEY_SIZE};

/// Prefix of root pointer record keys.
const ROOT_PREFIX: &[u8] = b"root|";

/// Prefix of orphan log record keys.
const ORPHAN_PREFIX: &[u8] = b"orphan|";

/// A durable byte-level map.
///
/// Implementations must be safe for concurrent readers; the engine itself
/// is single-writer.
pub trait KvBackend: Send + Sync {
    /// Reads the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] or [`Error::Io`] if the read fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] or [`Error::Io`] if the write fails.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes `key` if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] or [`Error::Io`] if the delete fails.
    fn delete(&self, key: &[u8]) -> Result<()>;
}

/// Node-level persistence consumed by the tree and the checkpointer.
pub trait NodeStore {
    /// Persists a node record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the node is not persistable, or a
    /// backend error if the write fails.
    fn put(&self, node: &Node) -> Result<()>;

    /// Loads the node named by `node_key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] if no record exists — fatal when hit
    /// during child resolution, since it means a dangling identity.
    fn get(&self, node_key: NodeKey) -> Result<Node>;

    /// Deletes the node named by `node_key`. Deleting an absent node is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the delete fails.
    fn delete(&self, node_key: NodeKey) -> Result<()>;

    /// Writes the root pointer record for `version`.
    ///
    /// `root` may be the empty sentinel, recording a committed empty tree.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    fn save_root(&self, version: i64, root: NodeKey) -> Result<()>;

    /// Reads the root pointer record for `version`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] if no record exists.
    fn load_root(&self, version: i64) -> Result<NodeKey>;

    /// Records the identities orphaned by `version`, for a pruning
    /// subsystem to consume later. Recording an empty list is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    fn record_orphans(&self, version: i64, orphans: &[NodeKey]) -> Result<()>;

    /// Reads the orphan log of `version`. Missing log = empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the record is malformed.
    fn load_orphans(&self, version: i64) -> Result<Vec<NodeKey>>;
}

/// [`NodeStore`] adapter over any [`KvBackend`].
///
/// Encodes nodes with the canonical codec and lays out records as described
/// in the module docs. Cheap to clone; clones share the backend.
pub struct KvNodeStore<B: KvBackend> {
    backend: Arc<B>,
}

impl<B: KvBackend> KvNodeStore<B> {
    /// Creates a store over `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// The shared backend handle.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn root_record_key(version: i64) -> Vec<u8> {
        let mut key = Vec::with_capacity(ROOT_PREFIX.len() + 8);
        key.extend_from_slice(ROOT_PREFIX);
        key.write_i64::<BigEndian>(version).expect("vec write is infallible");
        key
    }

    fn orphan_record_key(version: i64) -> Vec<u8> {
        let mut key = Vec::with_capacity(ORPHAN_PREFIX.len() + 8);
        key.extend_from_slice(ORPHAN_PREFIX);
        key.write_i64::<BigEndian>(version).expect("vec write is infallible");
        key
    }
}

impl<B: KvBackend> Clone for KvNodeStore<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: KvBackend> NodeStore for KvNodeStore<B> {
    fn put(&self, node: &Node) -> Result<()> {
        let bytes = codec::encode_node(node)?;
        self.backend.set(&node.node_key().encode(), &bytes)
    }

    fn get(&self, node_key: NodeKey) -> Result<Node> {
        let bytes = self
            .backend
            .get(&node_key.encode())?
            .ok_or(Error::NodeNotFound { node_key })?;
        codec::decode_node(node_key, &bytes)
    }

    fn delete(&self, node_key: NodeKey) -> Result<()> {
        self.backend.delete(&node_key.encode())
    }

    fn save_root(&self, version: i64, root: NodeKey) -> Result<()> {
        self.backend.set(&Self::root_record_key(version), &root.encode())
    }

    fn load_root(&self, version: i64) -> Result<NodeKey> {
        let bytes = self
            .backend
            .get(&Self::root_record_key(version))?
            .ok_or(Error::VersionNotFound { version })?;
        NodeKey::decode(&bytes)
    }

    fn record_orphans(&self, version: i64, orphans: &[NodeKey]) -> Result<()> {
        if orphans.is_empty() {
            return Ok(());
        }
        let mut value = Vec::with_capacity(orphans.len() * NODE_KEY_SIZE);
        for nk in orphans {
            value.extend_from_slice(&nk.encode());
        }
        self.backend.set(&Self::orphan_record_key(version), &value)
    }

    fn load_orphans(&self, version: i64) -> Result<Vec<NodeKey>> {
        let Some(bytes) = self.backend.get(&Self::orphan_record_key(version))? else {
            return Ok(Vec::new());
        };
        if bytes.len() % NODE_KEY_SIZE != 0 {
            return Err(Error::Corrupted {
                reason: format!("orphan log for version {version} has odd length {}", bytes.len()),
            });
        }
        bytes.chunks(NODE_KEY_SIZE).map(NodeKey::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::leaf_hash;

    fn store() -> KvNodeStore<MemoryBackend> {
        KvNodeStore::new(Arc::new(MemoryBackend::new()))
    }

    fn sample_leaf(version: i64, sequence: u32) -> Node {
        Node {
            node_key: NodeKey::new(version, sequence),
            key: b"pear".to_vec(),
            value: Some(b"green".to_vec()),
            size: 1,
            hash: Some(leaf_hash(b"pear", b"green")),
            ..Node::default()
        }
    }

    #[test]
    fn test_node_round_trip_through_store() {
        let store = store();
        let leaf = sample_leaf(1, 0);
        store.put(&leaf).unwrap();

        let loaded = store.get(leaf.node_key()).unwrap();
        assert_eq!(loaded.node_key(), leaf.node_key());
        assert_eq!(loaded.key(), leaf.key());
        assert_eq!(loaded.value(), leaf.value());
        assert_eq!(loaded.hash(), leaf.hash());
        assert!(!loaded.dirty);
    }

    #[test]
    fn test_get_missing_node_is_not_found() {
        let store = store();
        match store.get(NodeKey::new(9, 9)) {
            Err(Error::NodeNotFound { node_key }) => assert_eq!(node_key, NodeKey::new(9, 9)),
            other => panic!("expected NodeNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_node() {
        let store = store();
        let leaf = sample_leaf(1, 0);
        store.put(&leaf).unwrap();
        store.delete(leaf.node_key()).unwrap();
        assert!(store.get(leaf.node_key()).is_err());
        // Deleting again is not an error.
        store.delete(leaf.node_key()).unwrap();
    }

    #[test]
    fn test_root_records() {
        let store = store();
        let root = NodeKey::new(3, 17);
        store.save_root(3, root).unwrap();
        assert_eq!(store.load_root(3).unwrap(), root);

        // The empty sentinel records a committed empty tree.
        store.save_root(4, NodeKey::EMPTY).unwrap();
        assert!(store.load_root(4).unwrap().is_empty());
    }

    #[test]
    fn test_load_root_missing_version() {
        let store = store();
        match store.load_root(12) {
            Err(Error::VersionNotFound { version }) => assert_eq!(version, 12),
            other => panic!("expected VersionNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_orphan_log_round_trip() {
        let store = store();
        let orphans = vec![NodeKey::new(1, 0), NodeKey::new(1, 2), NodeKey::new(2, 1)];
        store.record_orphans(3, &orphans).unwrap();
        assert_eq!(store.load_orphans(3).unwrap(), orphans);
    }

    #[test]
    fn test_orphan_log_missing_is_empty() {
        let store = store();
        assert!(store.load_orphans(7).unwrap().is_empty());
    }

    #[test]
    fn test_record_keys_do_not_collide() {
        // A node record key is exactly 12 bytes; root/orphan keys are longer
        // and prefixed. Write all three for the same "version" and read back.
        let store = store();
        let leaf = sample_leaf(5, 0);
        store.put(&leaf).unwrap();
        store.save_root(5, leaf.node_key()).unwrap();
        store.record_orphans(5, &[NodeKey::new(4, 0)]).unwrap();

        assert_eq!(store.get(leaf.node_key()).unwrap().key(), b"pear");
        assert_eq!(store.load_root(5).unwrap(), leaf.node_key());
        assert_eq!(store.load_orphans(5).unwrap(), vec![NodeKey::new(4, 0)]);
    }
}
