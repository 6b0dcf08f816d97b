//! Mutation and persistence counters for a tree.
//!
//! Plain counters owned by the single-writer tree — no atomics, no global
//! sink. Hosts that want a metrics pipeline read these after commits.

/// Counters accumulated over a tree's lifetime.
#[derive(Debug, Clone, Default)]
pub struct TreeMetrics {
    /// Keys inserted for the first time.
    pub tree_new_node: u64,
    /// Existing keys overwritten.
    pub tree_update: u64,
    /// Keys removed.
    pub tree_delete: u64,
    /// Slots handed out by the pool to this tree.
    pub pool_get: u64,
    /// Slots returned to the pool by this tree.
    pub pool_put: u64,
    /// Nodes faulted in from the store during resolution.
    pub store_load: u64,
    /// Node records written by checkpoints.
    pub nodes_written: u64,
    /// Approximate bytes of node payload written by checkpoints.
    pub bytes_written: u64,
    /// Successful `save_version` calls.
    pub versions_saved: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default_is_zeroed() {
        let metrics = TreeMetrics::default();
        assert_eq!(metrics.tree_new_node, 0);
        assert_eq!(metrics.nodes_written, 0);
        assert_eq!(metrics.versions_saved, 0);
    }
}
