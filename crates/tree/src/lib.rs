//! canopy-tree: an immutable, versioned, authenticated key-value tree.
//!
//! Canopy is the storage-engine core of a versioned merkle key-value
//! store: a balanced binary search tree with copy-on-write mutation where
//! every committed version produces a SHA-256 root that commits to the
//! whole key space, and every older version stays addressable through its
//! root record.
//!
//! - **Single writer**: one thread mutates; readers open their own tree
//!   over the same store and load a committed version
//! - **Copy-on-write**: touching a committed node mints a fresh identity
//!   and orphans the old one for later pruning
//! - **Bounded memory**: all nodes live in a slot arena; clean leaves are
//!   evicted and faulted back in from the store on demand
//! - **Durable versions**: a version's dirty nodes are written before its
//!   root pointer, so a torn commit never leaves a dangling root
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  Tree API                    │
//! │   (set, remove, get, save/load_version)     │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │             Mutation Engine                  │
//! │  (copy-on-write paths, AVL balance, orphan  │
//! │   log, post-order merkle hashing)           │
//! └───────┬────────────────────────┬────────────┘
//!         │                        │
//! ┌───────▼──────────┐  ┌──────────▼────────────┐
//! │    NodePool      │  │     Checkpointer      │
//! │ (slot arena,     │  │ (batch write, root    │
//! │  clock eviction) │  │  pointer, orphan log) │
//! └───────┬──────────┘  └──────────┬────────────┘
//!         │                        │
//! ┌───────▼────────────────────────▼────────────┐
//! │                 NodeStore                    │
//! │     (KvNodeStore over any byte store)       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use canopy_tree::{KvNodeStore, MemoryBackend, NodePool, Tree};
//!
//! let store = KvNodeStore::new(Arc::new(MemoryBackend::new()));
//! let mut tree = Tree::new(store, NodePool::new());
//!
//! tree.set(b"apple", b"red")?;
//! let (root_hash, version) = tree.save_version()?;
//!
//! tree.set(b"apple", b"green")?;
//! tree.save_version()?;
//!
//! tree.load_version(version)?;
//! assert_eq!(tree.get(b"apple")?, Some(b"red".to_vec()));
//! assert_eq!(tree.root_hash(), root_hash);
//! # Ok::<(), canopy_tree::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// Recursive remove threads (subtree, separator, value, removed) results
#![allow(clippy::type_complexity)]

pub mod checkpoint;
pub mod codec;
pub mod error;
pub mod metrics;
pub mod node;
pub mod pool;
pub mod store;
pub mod tree;

// Re-export commonly used types
pub use checkpoint::{CheckpointBatch, CheckpointStats, CheckpointWorker, Checkpointer};
pub use codec::{Hash, EMPTY_HASH, HASH_SIZE};
pub use error::{Error, Result};
pub use metrics::TreeMetrics;
pub use node::{Node, NodeKey, SlotId, NODE_KEY_SIZE};
pub use pool::{NodePool, PoolConfig, PoolStats};
pub use store::{KvBackend, KvNodeStore, MemoryBackend, NodeStore};
pub use tree::{IntegrityReport, Tree};
