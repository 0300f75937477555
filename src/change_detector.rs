//! Change detection against the head checkpoint
//!
//! A path has changed when its current content differs from the blob the
//! head commit records for it. Reading every file on every save would be
//! wasteful, so the staging index is consulted first:
//!
//! | Staged oid vs head | Stat data vs staged | Result |
//! |---|---|---|
//! | equal | size and mtime equal | [`StatusCheck::Unmodified`] |
//! | equal | size differs | [`StatusCheck::Modified`] |
//! | equal | only mtime differs | [`StatusCheck::Ambiguous`] |
//! | equal | staged at or after the index write | [`StatusCheck::Ambiguous`] |
//! | different or missing | any | [`StatusCheck::Ambiguous`] |
//!
//! A mode change (regular, executable, symlink) is always `Modified`.
//! Ambiguous paths fall back to comparing the current bytes with the head
//! blob. Per-path read failures are logged and reported as unchanged.

use crate::error::Result;
use crate::ignore_rules::IgnoreResolver;
use crate::index::StagingIndex;
use crate::scanner::ScannedFile;
use crate::storage::{FlatEntry, ObjectStore};
use crate::utils::{self, FileStat};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Outcome of the cheap stat-based comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    /// Same content as head, no need to read the file
    Unmodified,
    /// Definitely different from head
    Modified,
    /// Cannot tell from stat data; compare bytes
    Ambiguous,
}

/// Paths sorted by [`ChangeDetector::classify`]
///
/// Paths whose check failed appear in neither set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Added, modified or deleted since head
    pub changed: BTreeSet<String>,
    /// Confirmed identical to head
    pub clean: BTreeSet<String>,
}

/// Decides which paths differ from the head checkpoint
#[derive(Debug)]
pub struct ChangeDetector<'a> {
    root: &'a Path,
    store: &'a ObjectStore,
    rules: &'a IgnoreResolver,
    index: &'a StagingIndex,
    head: &'a BTreeMap<String, FlatEntry>,
}

impl<'a> ChangeDetector<'a> {
    /// Create a detector over a flattened head tree
    pub fn new(
        root: &'a Path,
        store: &'a ObjectStore,
        rules: &'a IgnoreResolver,
        index: &'a StagingIndex,
        head: &'a BTreeMap<String, FlatEntry>,
    ) -> Self {
        Self { root, store, rules, index, head }
    }

    /// Whether `path` (relative to the root) differs from head
    ///
    /// Excluded paths are never changed. Read errors are logged and count as
    /// unchanged.
    pub fn has_changed(&self, path: &Path) -> bool {
        if self.rules.is_excluded(path) {
            return false;
        }
        let relative = path.strip_prefix(self.root).unwrap_or(path);
        let Some(tree_path) = utils::to_tree_path(relative) else {
            return false;
        };

        let absolute = self.root.join(relative);
        let result = utils::file_stat(&absolute)
            .and_then(|stat| self.compare(&tree_path, &absolute, stat.as_ref()));
        match result {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Could not check {}: {}", tree_path, e);
                false
            }
        }
    }

    /// Changed paths among `scanned`, plus head paths that are gone
    ///
    /// Deleted paths are included so that a deletion alone still produces a
    /// new checkpoint. The result is sorted and free of duplicates.
    pub fn changed_files(&self, scanned: &[ScannedFile]) -> Vec<String> {
        self.classify(scanned).changed.into_iter().collect()
    }

    /// Split the scanned paths into changed and verified-clean sets
    pub fn classify(&self, scanned: &[ScannedFile]) -> Classification {
        let mut result = Classification::default();
        let mut present = BTreeSet::new();

        for file in scanned {
            present.insert(file.tree_path.as_str());
            let absolute = self.root.join(&file.path);
            match self.compare(&file.tree_path, &absolute, Some(&file.stat)) {
                Ok(true) => {
                    result.changed.insert(file.tree_path.clone());
                }
                Ok(false) => {
                    result.clean.insert(file.tree_path.clone());
                }
                Err(e) => warn!("Could not check {}: {}", file.tree_path, e),
            }
        }

        for path in self.head.keys() {
            if !present.contains(path.as_str()) {
                trace!("{} removed since head", path);
                result.changed.insert(path.clone());
            }
        }

        debug!("{} of {} paths changed", result.changed.len(), scanned.len());
        result
    }

    /// Stat-only comparison of a present file with its head entry
    pub fn status_check(&self, tree_path: &str, head: &FlatEntry, stat: &FileStat) -> StatusCheck {
        if stat.mode != head.mode {
            return StatusCheck::Modified;
        }
        match self.index.get(tree_path) {
            Some(staged) if staged.oid == head.oid => {
                if staged.size != stat.size {
                    StatusCheck::Modified
                } else if staged.mtime_ns == stat.mtime_ns && !self.index.is_racy(staged) {
                    StatusCheck::Unmodified
                } else {
                    StatusCheck::Ambiguous
                }
            }
            _ => StatusCheck::Ambiguous,
        }
    }

    fn compare(&self, tree_path: &str, absolute: &Path, stat: Option<&FileStat>) -> Result<bool> {
        let (head, stat) = match (self.head.get(tree_path), stat) {
            (None, current) => return Ok(current.is_some()),
            (Some(_), None) => return Ok(true),
            (Some(head), Some(stat)) => (head, stat),
        };

        match self.status_check(tree_path, head, stat) {
            StatusCheck::Unmodified => Ok(false),
            StatusCheck::Modified => Ok(true),
            StatusCheck::Ambiguous => {
                let current = utils::read_tracked_content(absolute, stat.mode)?;
                let committed = self.store.read_blob(&head.oid)?;
                let changed = current != committed;
                trace!("{} byte comparison: changed={}", tree_path, changed);
                Ok(changed)
            }
        }
    }
}
