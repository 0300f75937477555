//! Rewinding the working directory to a checkpoint
//!
//! A restore runs through these stages:
//!
//! ```text
//! Idle -> VerifyingTarget -> RewindingRef -> RestoringFiles -> Idle
//! ```
//!
//! The branch ref is moved and the staging index cleared before any file is
//! touched. A failure while restoring files therefore leaves the ref already
//! pointing at the target; individual file failures are collected as
//! warnings instead of aborting the walk.
//!
//! Files are materialized with an explicit work stack rather than recursion,
//! so deeply nested trees cannot exhaust the call stack. Files whose content
//! already matches the target are left untouched.

use crate::error::{Result, WaypointError};
use crate::history::HistoryReader;
use crate::object::{hash_object, FileMode, ObjectKind, Oid};
use crate::refs::RefStore;
use crate::scanner::TreeScanner;
use crate::storage::ObjectStore;
use crate::types::{RestoreMode, RestoreOutcome, RestoreResult};
use crate::utils;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Rewinds the branch and the working tree to an earlier checkpoint
pub struct CheckpointRestorer<'a> {
    root: &'a Path,
    store: &'a ObjectStore,
    refs: &'a dyn RefStore,
    scanner: &'a TreeScanner,
}

impl<'a> CheckpointRestorer<'a> {
    /// Create a restorer over an opened repository
    pub fn new(
        root: &'a Path,
        store: &'a ObjectStore,
        refs: &'a dyn RefStore,
        scanner: &'a TreeScanner,
    ) -> Self {
        Self { root, store, refs, scanner }
    }

    /// Restore `target` (full id, unique prefix or `HEAD`)
    ///
    /// An unknown target is reported as [`RestoreOutcome::CommitNotFound`];
    /// nothing is modified in that case.
    pub fn restore(&self, target: &str, mode: RestoreMode) -> Result<RestoreOutcome> {
        let history = HistoryReader::new(self.store, self.refs);

        // VerifyingTarget
        let target_oid = match history.resolve(target) {
            Ok(oid) => oid,
            Err(WaypointError::CommitNotFound(_)) | Err(WaypointError::InvalidOid(_)) | Err(WaypointError::NoHead) => {
                info!("Restore target {} not found", target);
                return Ok(RestoreOutcome::CommitNotFound(target.to_string()));
            }
            Err(e) => return Err(e),
        };
        let commit = self.store.read_commit(&target_oid)?;

        let previous_head_oid = self.refs.read_ref()?;
        let commits_removed = previous_head_oid
            .and_then(|head| history.distance(&head, &target_oid))
            .unwrap_or(0);

        // RewindingRef
        self.refs.write_ref(&target_oid)?;
        self.refs.clear_index()?;
        info!(
            "Rewound to {} ({} commits removed, {:?} restore)",
            target_oid.short(),
            commits_removed,
            mode
        );

        // RestoringFiles
        let mut result = RestoreResult {
            target_oid,
            previous_head_oid,
            commits_removed,
            files_restored: 0,
            files_deleted: 0,
            warnings: Vec::new(),
        };
        self.materialize(&commit.tree, &mut result)?;

        if mode == RestoreMode::Hard {
            // every path of the target is kept, including ones that failed to restore
            let keep: BTreeSet<String> =
                self.store.flatten_tree(&commit.tree)?.into_keys().collect();
            self.remove_extra_files(&keep, &mut result);
        }

        debug!(
            "Restore finished: {} restored, {} deleted, {} warnings",
            result.files_restored,
            result.files_deleted,
            result.warnings.len()
        );
        Ok(RestoreOutcome::Restored(result))
    }

    /// Write every blob of `tree` under the root
    fn materialize(&self, tree: &Oid, result: &mut RestoreResult) -> Result<()> {
        let mut stack: Vec<(String, Oid)> = vec![(String::new(), *tree)];

        while let Some((dir, tree_oid)) = stack.pop() {
            let tree = self.store.read_tree(&tree_oid)?;
            for entry in tree.entries {
                let tree_path = if dir.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", dir, entry.name)
                };
                let absolute = utils::from_tree_path(self.root, &tree_path);

                if entry.mode.is_tree() {
                    if let Err(e) = ensure_directory(&absolute) {
                        record_warning(result, &tree_path, &e);
                        continue;
                    }
                    stack.push((tree_path, entry.oid));
                    continue;
                }

                match self.restore_file(&absolute, entry.mode, &entry.oid) {
                    Ok(written) => {
                        if written {
                            trace!("Restored {}", tree_path);
                        }
                        result.files_restored += 1;
                    }
                    Err(e) if e.is_corruption() => return Err(e),
                    Err(e) => record_warning(result, &tree_path, &e),
                }
            }
        }
        Ok(())
    }

    /// Make `path` hold blob `oid` with `mode`; `false` if it already did
    fn restore_file(&self, path: &Path, mode: FileMode, oid: &Oid) -> Result<bool> {
        let current = utils::file_stat(path)?;
        if let Some(stat) = current {
            if stat.mode == mode {
                let bytes = utils::read_tracked_content(path, mode)?;
                if hash_object(ObjectKind::Blob, &bytes) == *oid {
                    return Ok(false);
                }
            }
        }

        let content = self.store.read_blob(oid)?;
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        clear_path(path, mode)?;

        match mode {
            FileMode::Symlink => utils::create_symlink(&content, path)?,
            _ => {
                fs::write(path, &content)?;
                utils::set_executable(path, mode == FileMode::Executable)?;
            }
        }
        Ok(true)
    }

    /// Delete trackable files absent from the target and prune empty directories
    fn remove_extra_files(&self, keep: &BTreeSet<String>, result: &mut RestoreResult) {
        let mut touched_dirs = BTreeSet::new();

        for file in self.scanner.scan() {
            if keep.contains(&file.tree_path) {
                continue;
            }
            let absolute = self.root.join(&file.path);
            match fs::remove_file(&absolute) {
                Ok(()) => {
                    trace!("Deleted {}", file.tree_path);
                    result.files_deleted += 1;
                    if let Some(parent) = absolute.parent() {
                        touched_dirs.insert(parent.to_path_buf());
                    }
                }
                Err(e) => record_warning(result, &file.tree_path, &WaypointError::Io(e)),
            }
        }

        // deepest first so emptied parents are pruned too
        let mut dirs: Vec<PathBuf> = touched_dirs.into_iter().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            let mut current = dir.as_path();
            while current != self.root && current.starts_with(self.root) {
                match utils::remove_dir_if_empty(current) {
                    Ok(true) => {}
                    _ => break,
                }
                match current.parent() {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }
    }
}

/// Create `path` as a directory, replacing a file or symlink in the way
fn ensure_directory(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => return Ok(()),
        Ok(_) => fs::remove_file(path)?,
        Err(_) => {}
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// Remove whatever occupies `path` unless it can be overwritten in place
fn clear_path(path: &Path, mode: FileMode) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path)?,
        Ok(metadata) if metadata.file_type().is_symlink() || mode == FileMode::Symlink => {
            fs::remove_file(path)?
        }
        _ => {}
    }
    Ok(())
}

fn record_warning(result: &mut RestoreResult, tree_path: &str, error: &WaypointError) {
    warn!("Could not restore {}: {}", tree_path, error);
    result.warnings.push(format!("{}: {}", tree_path, error));
}
