//! Error types for the Waypoint library
//!
//! Every public operation returns [`Result<T>`](Result). Structural problems
//! (an uninitialized repository, a lost race on the branch ref) surface as
//! errors; expected outcomes such as "nothing changed" or "restore target
//! does not exist" are modelled as result values instead.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Waypoint library
pub type Result<T> = std::result::Result<T, WaypointError>;

/// Main error type for all Waypoint operations
#[derive(Debug, Error)]
pub enum WaypointError {
    /// The object store directory is missing or lacks `HEAD`/`objects`/`refs`
    #[error("Repository not initialized at path: {0:?}")]
    RepositoryNotInitialized(PathBuf),

    /// The identifier does not resolve to a commit object
    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    /// The branch ref has never been written (no save has succeeded yet)
    #[error("No HEAD: repository has no commits yet")]
    NoHead,

    /// I/O failure inside the object store, with the operation that failed
    #[error("Object store I/O failure while {context}")]
    ObjectStore {
        /// What the store was doing when the failure happened
        context: String,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// The branch ref moved (or is locked) between scan and commit
    #[error("Ref update conflict on {ref_name}: expected {expected}, found {actual}")]
    RefUpdateConflict {
        /// Ref being updated
        ref_name: String,
        /// Value observed when the save started
        expected: String,
        /// Value found when trying to advance it
        actual: String,
    },

    /// A stored object could not be decoded
    #[error("Corrupt object {oid}: {reason}")]
    CorruptObject {
        /// Object identifier
        oid: String,
        /// What was wrong with it
        reason: String,
    },

    /// A string is not a valid 40-character hex object identifier
    #[error("Invalid object id: {0:?}")]
    InvalidOid(String),

    /// A hex prefix matches more than one commit
    #[error("Ambiguous object id prefix {prefix:?} ({candidates} candidates)")]
    AmbiguousOid {
        /// Prefix supplied by the caller
        prefix: String,
        /// Number of matching objects
        candidates: usize,
    },

    /// Path is not present in the requested commit's tree
    #[error("Path {path:?} not found in commit {oid}")]
    PathNotFound {
        /// Path relative to the project root
        path: PathBuf,
        /// Commit that was searched
        oid: String,
    },

    /// Ignore pattern could not be compiled
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Configuration file could not be read or written
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Staging index could not be encoded or decoded
    #[error("Index error: {0}")]
    Index(String),

    /// I/O errors outside the object store (working directory files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::error::DecodeError> for WaypointError {
    fn from(err: bincode::error::DecodeError) -> Self {
        WaypointError::Index(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for WaypointError {
    fn from(err: bincode::error::EncodeError) -> Self {
        WaypointError::Index(err.to_string())
    }
}

impl WaypointError {
    /// Wrap an I/O error raised by the object store with operation context
    pub fn store(context: impl Into<String>, source: std::io::Error) -> Self {
        WaypointError::ObjectStore {
            context: context.into(),
            source,
        }
    }

    /// Create a corrupt-object error
    pub fn corrupt(oid: impl Into<String>, reason: impl Into<String>) -> Self {
        WaypointError::CorruptObject {
            oid: oid.into(),
            reason: reason.into(),
        }
    }

    /// Check if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WaypointError::RefUpdateConflict { .. })
    }

    /// Check if this error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            WaypointError::CorruptObject { .. } | WaypointError::Index(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            WaypointError::RepositoryNotInitialized(path) => {
                format!("No checkpoint store at {:?}. Run 'waypoint init' first.", path)
            }
            WaypointError::NoHead => {
                "No checkpoints yet. Save one with 'waypoint save'.".to_string()
            }
            WaypointError::CommitNotFound(id) => {
                format!("Checkpoint '{}' not found. Use 'waypoint log' to see available checkpoints.", id)
            }
            WaypointError::RefUpdateConflict { .. } => {
                "Another save or restore moved the checkpoint head concurrently. Try again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
