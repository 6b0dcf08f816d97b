//! In-memory storage backend for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::KvBackend;
use crate::error::Result;

/// In-memory byte store.
///
/// All data lives in a `BTreeMap` and is lost when the backend is dropped.
/// Useful for unit tests, property tests and benchmarking; also a reference
/// for what the engine requires from a real backend (nothing but get, set
/// and delete). Tracks write counters so tests can assert persistence
/// traffic.
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the backend holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total `set` calls since creation.
    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Total `delete` calls since creation.
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Drops all records (for testing).
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
