//! Core data types used throughout the Waypoint library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Configuration**: [`WaypointConfig`], persisted as `waypoint.json`
//! - **Operation results**: [`InitResult`], [`SaveResult`], [`LogResult`],
//!   [`ChangeSummary`], [`RestoreOutcome`]
//! - **Operation parameters**: [`RestoreMode`]
//!
//! Every result type serializes with serde so collaborators can forward it
//! as JSON unchanged.
//!
//! ## Examples
//!
//! ```rust
//! use waypoint::types::{SaveResult, SaveStatus};
//!
//! let result = SaveResult::no_changes();
//! assert_eq!(result.status, SaveStatus::NoChanges);
//! assert_eq!(result.files_processed, 0);
//! ```

use crate::object::{Commit, Oid};
use serde::{Deserialize, Serialize};

/// Default name of the object-store directory under the project root
pub const DEFAULT_STORE_DIR: &str = ".waypoint";

/// Default author/committer name
pub const DEFAULT_AUTHOR_NAME: &str = "Waypoint";

/// Default author/committer email
pub const DEFAULT_AUTHOR_EMAIL: &str = "checkpoints@waypoint.local";

/// Author and committer recorded on every checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            name: DEFAULT_AUTHOR_NAME.to_string(),
            email: DEFAULT_AUTHOR_EMAIL.to_string(),
        }
    }
}

/// Engine configuration
///
/// Written to `<store>/waypoint.json` by `initialize` and read back by
/// `open`. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    /// Store directory name, relative to the project root
    pub store_dir_name: String,
    /// Extra ignore patterns (gitignore syntax) on top of `.gitignore`
    pub ignore_patterns: Vec<String>,
    /// Checkpoint author and committer
    pub identity: Identity,
    /// Whether `initialize` records a checkpoint of the initial state
    pub initial_commit: bool,
    /// Maximum file size to track (0 = unlimited)
    pub max_file_size: u64,
    /// Waypoint version that wrote this config
    pub version: String,
}

impl Default for WaypointConfig {
    fn default() -> Self {
        WaypointConfig {
            store_dir_name: DEFAULT_STORE_DIR.to_string(),
            ignore_patterns: Vec::new(),
            identity: Identity::default(),
            initial_commit: false,
            max_file_size: 0,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Whether `initialize` created anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    /// The store was created
    Success,
    /// A valid store already existed; nothing was touched
    Skipped,
}

/// Result of `initialize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResult {
    /// Created or skipped
    pub status: InitStatus,
    /// Whether `.gitignore` was created or extended
    pub ignore_file_updated: bool,
    /// Checkpoint of the initial state, when configured
    pub initial_commit_oid: Option<Oid>,
}

/// Whether `save` produced a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    /// A new commit was written and the branch advanced
    Success,
    /// Nothing differed from head
    NoChanges,
}

/// Result of `save`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    /// Created or nothing to do
    pub status: SaveStatus,
    /// New head commit
    pub oid: Option<Oid>,
    /// Number of changed paths (including deletions)
    pub files_processed: usize,
    /// Changed paths, `/`-separated and sorted
    pub files: Vec<String>,
}

impl SaveResult {
    /// Result for a save that found nothing to record
    pub fn no_changes() -> Self {
        SaveResult { status: SaveStatus::NoChanges, oid: None, files_processed: 0, files: Vec::new() }
    }
}

/// Result of `log`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LogResult {
    /// Commits, newest first
    pub commits: Vec<Commit>,
    /// Number of commits returned
    pub total_count: usize,
}

/// Result of `has_changes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangeSummary {
    /// Whether a save would create a checkpoint
    pub has_changes: bool,
    /// Paths a save would record, sorted
    pub changed_files: Vec<String>,
}

/// How `restore` treats files that do not exist in the target checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// Overwrite files from the target; leave extra files in place
    #[default]
    Soft,
    /// Also delete trackable files absent from the target
    Hard,
}

/// Details of a completed restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Commit the branch now points to
    pub target_oid: Oid,
    /// Head before the restore
    pub previous_head_oid: Option<Oid>,
    /// Commits between the previous head and the target (best effort)
    pub commits_removed: usize,
    /// Files written from the target tree
    pub files_restored: usize,
    /// Files deleted (hard mode only)
    pub files_deleted: usize,
    /// Per-file problems that did not abort the restore
    pub warnings: Vec<String>,
}

/// Outcome of `restore`; an unknown target is a value, not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// Working tree and branch were rewound
    Restored(RestoreResult),
    /// The target does not name a commit
    CommitNotFound(String),
}

impl RestoreOutcome {
    /// The restore details, if the target existed
    pub fn restored(&self) -> Option<&RestoreResult> {
        match self {
            RestoreOutcome::Restored(result) => Some(result),
            RestoreOutcome::CommitNotFound(_) => None,
        }
    }
}
