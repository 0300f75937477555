//! # Waypoint - Silent checkpoints for coding agents
//!
//! A checkpoint engine that records snapshots of a project directory in a
//! git-compatible object store, so an autonomous agent can save the state of
//! the tree before each edit and rewind to any earlier point.
//!
//! ## Overview
//!
//! Waypoint keeps its own store in `.waypoint/` under the project root and
//! never touches the user's `.git`. With Waypoint you can:
//! - Record a checkpoint of every trackable file in one call
//! - Skip the write entirely when nothing changed since the last checkpoint
//! - List checkpoint history newest first
//! - Restore the working directory to any earlier checkpoint
//! - Read a single file as it was at any checkpoint
//!
//! ## Architecture
//!
//! - **Object store**: blobs, trees and commits in git's loose object format
//!   (SHA-1 ids, zlib compression). `git --git-dir=.waypoint log` works on it.
//! - **Single linear branch**: `refs/heads/main` points at the newest
//!   checkpoint and only moves through compare-and-swap.
//! - **Staging index**: cached stat data that lets a save skip reading files
//!   whose size and mtime match the last checkpoint.
//! - **Ignore rules**: the root `.gitignore` plus configured patterns; the
//!   store directory and other VCS directories are always excluded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use waypoint::{RestoreMode, RestoreOutcome, Waypoint};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (waypoint, _) = Waypoint::initialize("./my_project")?;
//!
//! let before = waypoint.save(Some("before edit"))?;
//! // ... modify files ...
//! let after = waypoint.save(None)?;
//! println!("changed: {:?}", after.files);
//!
//! let target = before.oid.expect("first save records a commit");
//! match waypoint.restore(&target.to_hex(), RestoreMode::Soft)? {
//!     RestoreOutcome::Restored(result) => {
//!         println!("restored {} files", result.files_restored)
//!     }
//!     RestoreOutcome::CommitNotFound(id) => println!("no checkpoint {}", id),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Restore Modes
//!
//! [`RestoreMode::Soft`] writes every file recorded in the target checkpoint
//! and leaves other files alone. [`RestoreMode::Hard`] also deletes tracked,
//! non-ignored files that the target does not contain.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`] with [`WaypointError`].
//! Per-file problems during a save or restore are logged through `tracing`
//! (or reported as restore warnings) rather than failing the whole operation.
//!
//! ## Module Organization
//!
//! - [`waypoint`]: main API entry point
//! - [`object`]: git object model and encoding
//! - [`storage`]: loose object store
//! - [`refs`]: branch ref updates
//! - [`snapshot`], [`restore`], [`history`]: the checkpoint operations
//! - [`types`]: configuration and result types
//! - [`error`]: error types

// Public API modules
pub mod error;
pub mod history;
pub mod object;
pub mod refs;
pub mod restore;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod utils;
pub mod waypoint;

// Building blocks of save and restore
pub mod change_detector;
pub mod ignore_rules;
pub mod index;
pub mod scanner;

// Re-export main types for convenience
pub use error::{Result, WaypointError};
pub use object::{Commit, FileMode, Oid, Signature};
pub use types::*;
pub use waypoint::{Waypoint, WaypointBuilder};
