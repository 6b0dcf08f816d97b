//! Proptest strategies for Canopy domain values.
//!
//! Reusable generators for property-based testing. Keys are drawn from a
//! deliberately small alphabet so that random operation sequences revisit
//! existing keys often enough to exercise updates, removals and
//! copy-on-write paths rather than only inserting fresh keys.
//!
//! # Usage
//!
//! ```no_run
//! use canopy_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(ops in strategies::arb_op_sequence(32)) {
//!         // exercise the tree with a random operation sequence
//!     }
//! }
//! ```

use proptest::prelude::*;

/// A single mutation against the tree, as issued by a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOp {
    /// Insert or update `key` with `value`.
    Set {
        /// User key bytes.
        key: Vec<u8>,
        /// Non-empty value bytes.
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Remove {
        /// User key bytes.
        key: Vec<u8>,
    },
}

/// Generates a key of 1-5 characters from `[a-f]`.
///
/// The tiny alphabet keeps the key space small (~4,000 keys) so sequences
/// collide with themselves frequently.
pub fn arb_key() -> impl Strategy<Value = Vec<u8>> {
    "[a-f]{1,5}".prop_map(String::into_bytes)
}

/// Generates a non-empty value of 1-16 characters from `[a-z0-9]`.
pub fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    "[a-z0-9]{1,16}".prop_map(String::into_bytes)
}

/// Generates an arbitrary [`TreeOp`], biased 3:1 towards sets.
///
/// Removals of absent keys are expected and must be no-ops.
pub fn arb_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        3 => (arb_key(), arb_value()).prop_map(|(key, value)| TreeOp::Set { key, value }),
        1 => arb_key().prop_map(|key| TreeOp::Remove { key }),
    ]
}

/// Generates a sequence of 1 to `max` operations.
pub fn arb_op_sequence(max: usize) -> impl Strategy<Value = Vec<TreeOp>> {
    proptest::collection::vec(arb_op(), 1..max.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn keys_are_well_formed(key in arb_key()) {
            prop_assert!(!key.is_empty());
            prop_assert!(key.len() <= 5);
            prop_assert!(key.iter().all(|b| (b'a'..=b'f').contains(b)));
        }

        #[test]
        fn values_are_non_empty(value in arb_value()) {
            prop_assert!(!value.is_empty());
            prop_assert!(value.len() <= 16);
        }

        #[test]
        fn sequences_respect_bounds(ops in arb_op_sequence(32)) {
            prop_assert!(!ops.is_empty());
            prop_assert!(ops.len() < 32);
            for op in &ops {
                if let TreeOp::Set { value, .. } = op {
                    prop_assert!(!value.is_empty());
                }
            }
        }
    }
}
