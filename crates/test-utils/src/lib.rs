//! Shared test tooling for Canopy crates.
//!
//! Currently this is the home of the proptest strategies used by the
//! property-based tests in `canopy-tree`. Keeping them in a dedicated crate
//! lets every crate in the workspace generate the same well-formed keys,
//! values and operation sequences.

pub mod strategies;

pub use strategies::{arb_key, arb_op, arb_op_sequence, arb_value, TreeOp};
