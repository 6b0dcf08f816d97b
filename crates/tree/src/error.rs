//! Error types for the Canopy tree engine.

use std::io;

use snafu::Snafu;

use crate::node::NodeKey;

/// Result type alias for Canopy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during tree operations.
#[derive(Debug, Snafu)]
pub enum Error {
    /// Caller passed input the engine rejects (e.g. an empty value).
    #[snafu(display("Invalid input: {reason}"))]
    InvalidInput {
        /// Why the input was rejected.
        reason: String,
    },

    /// A node record was missing from the store.
    ///
    /// Fatal when hit during child resolution: a persisted branch referenced
    /// an identity the store no longer has.
    #[snafu(display("Node {node_key} not found in store"))]
    NodeNotFound {
        /// The missing node identity.
        node_key: NodeKey,
    },

    /// No root record exists for the requested version.
    #[snafu(display("Version {version} has no root record"))]
    VersionNotFound {
        /// The requested version.
        version: i64,
    },

    /// The storage backend failed.
    #[snafu(display("Backend error: {reason}"))]
    Backend {
        /// Description of the backend failure.
        reason: String,
    },

    /// A record failed to decode or an invariant was found broken.
    ///
    /// The tree should not be used further once this is raised.
    #[snafu(display("Corrupted state: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },
}

// Automatic conversion from io::Error for ergonomic ? usage in backends
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}
