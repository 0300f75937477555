//! Checkpoint creation
//!
//! `SnapshotWriter` turns the current working directory into a commit:
//!
//! 1. Scan trackable files and classify them against the head tree
//! 2. Stop with [`SaveStatus::NoChanges`] if nothing differs
//! 3. Write a blob for every changed file and record it in the staging index
//! 4. Build trees bottom-up from the **entire** current file set, reusing
//!    head blob ids for unchanged files without reading them
//! 5. Write the commit with the current head as parent
//! 6. Advance `refs/heads/main` with a compare-and-swap
//!
//! Objects written before a failed ref update are unreachable but harmless.

use crate::change_detector::ChangeDetector;
use crate::error::Result;
use crate::index::{IndexEntry, StagingIndex};
use crate::object::{Commit, FileMode, Oid, Signature, Tree, TreeEntry};
use crate::refs::RefStore;
use crate::scanner::TreeScanner;
use crate::storage::{FlatEntry, ObjectStore};
use crate::types::{ChangeSummary, Identity, SaveResult, SaveStatus};
use crate::utils;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, trace, warn};

/// Default message for checkpoints saved without one
pub fn default_message() -> String {
    format!("Checkpoint: {}", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Writes checkpoints of the working directory
pub struct SnapshotWriter<'a> {
    root: &'a Path,
    store: &'a ObjectStore,
    refs: &'a dyn RefStore,
    scanner: &'a TreeScanner,
    identity: &'a Identity,
}

impl<'a> SnapshotWriter<'a> {
    /// Create a writer over an opened repository
    pub fn new(
        root: &'a Path,
        store: &'a ObjectStore,
        refs: &'a dyn RefStore,
        scanner: &'a TreeScanner,
        identity: &'a Identity,
    ) -> Self {
        Self { root, store, refs, scanner, identity }
    }

    /// Paths a save would record right now
    pub fn pending_changes(&self) -> Result<ChangeSummary> {
        let parent = self.refs.read_ref()?;
        let head = self.store.flatten_commit(parent.as_ref())?;
        let index = StagingIndex::load(self.store.root());
        let scanned = self.scanner.scan();

        let changed_files =
            ChangeDetector::new(self.root, self.store, self.scanner.rules(), &index, &head)
                .changed_files(&scanned);
        Ok(ChangeSummary { has_changes: !changed_files.is_empty(), changed_files })
    }

    /// Record a checkpoint if anything changed since head
    pub fn save(&self, message: Option<&str>) -> Result<SaveResult> {
        self.write_snapshot(message, false)
    }

    /// Record a checkpoint even when nothing changed
    ///
    /// Used for the optional initial checkpoint, which may describe an empty
    /// tree.
    pub fn save_allow_empty(&self, message: Option<&str>) -> Result<SaveResult> {
        self.write_snapshot(message, true)
    }

    fn write_snapshot(&self, message: Option<&str>, allow_empty: bool) -> Result<SaveResult> {
        let parent = self.refs.read_ref()?;
        let head = self.store.flatten_commit(parent.as_ref())?;
        let mut index = StagingIndex::load(self.store.root());
        let scanned = self.scanner.scan();

        let classification =
            ChangeDetector::new(self.root, self.store, self.scanner.rules(), &index, &head)
                .classify(&scanned);

        let mut changed = classification.changed;
        if changed.is_empty() && !allow_empty {
            debug!("No changes since {:?}", parent.map(|p| p.short()));
            return Ok(SaveResult::no_changes());
        }

        // stage changed files, reuse head blobs for everything else
        let mut entries = BTreeMap::new();
        for file in &scanned {
            let reuse = if changed.contains(&file.tree_path) {
                None
            } else {
                head.get(&file.tree_path).copied()
            };

            match reuse {
                Some(committed) => {
                    let stale = index
                        .get(&file.tree_path)
                        .map_or(true, |staged| staged.oid != committed.oid || !staged.stat_matches(&file.stat));
                    if stale && classification.clean.contains(&file.tree_path) {
                        index.insert(file.tree_path.clone(), IndexEntry::new(committed.oid, &file.stat));
                    }
                    entries.insert(file.tree_path.clone(), committed);
                }
                None => {
                    let absolute = self.root.join(&file.path);
                    let content = match utils::read_tracked_content(&absolute, file.stat.mode) {
                        Ok(content) => content,
                        Err(e) => {
                            // unreadable files keep their head state
                            warn!("Could not read {}, keeping it unchanged: {}", file.tree_path, e);
                            changed.remove(&file.tree_path);
                            if let Some(committed) = head.get(&file.tree_path) {
                                entries.insert(file.tree_path.clone(), *committed);
                            }
                            continue;
                        }
                    };
                    let oid = self.store.write_blob(&content)?;
                    trace!("Staged {} as {}", file.tree_path, oid.short());
                    index.insert(file.tree_path.clone(), IndexEntry::new(oid, &file.stat));
                    entries.insert(file.tree_path.clone(), FlatEntry { mode: file.stat.mode, oid });
                }
            }
        }

        if changed.is_empty() && !allow_empty {
            debug!("Every changed file was unreadable, nothing to record");
            return Ok(SaveResult::no_changes());
        }

        let present: BTreeSet<&str> = entries.keys().map(String::as_str).collect();
        index.retain(|path| present.contains(path));

        let tree = write_tree(self.store, &entries)?;
        let signature = Signature::now(&self.identity.name, &self.identity.email);
        let message = message.map(str::to_string).unwrap_or_else(default_message);
        let commit = Commit::new(tree, parent, signature.clone(), signature, message);
        self.store.write_commit(&commit)?;

        self.refs.compare_and_swap(parent.as_ref(), &commit.oid)?;

        if let Err(e) = index.save() {
            warn!("Failed to persist staging index: {}", e);
        }

        let files: Vec<String> = changed.into_iter().collect();
        info!(
            "Created checkpoint {} ({} changed, {} tracked)",
            commit.oid.short(),
            files.len(),
            entries.len()
        );

        Ok(SaveResult {
            status: SaveStatus::Success,
            oid: Some(commit.oid),
            files_processed: files.len(),
            files,
        })
    }
}

/// Write the tree objects for a flat `path -> blob` map, returning the root tree
///
/// Directories are written deepest first so every subtree id is known before
/// its parent is encoded.
pub fn write_tree(store: &ObjectStore, entries: &BTreeMap<String, FlatEntry>) -> Result<Oid> {
    let mut dirs: BTreeMap<String, Vec<TreeEntry>> = BTreeMap::new();
    dirs.insert(String::new(), Vec::new());

    for (path, entry) in entries {
        let (dir, name) = split_parent(path);
        dirs.entry(dir.to_string()).or_default().push(TreeEntry {
            mode: entry.mode,
            name: name.to_string(),
            oid: entry.oid,
        });

        // register every ancestor so empty intermediate levels still get a tree
        let mut ancestor = dir;
        while !ancestor.is_empty() {
            let (parent, _) = split_parent(ancestor);
            dirs.entry(ancestor.to_string()).or_default();
            ancestor = parent;
        }
    }

    let mut order: Vec<String> = dirs.keys().cloned().collect();
    order.sort_by_key(|dir| std::cmp::Reverse(depth(dir)));

    let mut root = None;
    for dir in order {
        let children = dirs.remove(&dir).unwrap_or_default();
        let oid = store.write_tree(&Tree::new(children))?;

        if dir.is_empty() {
            root = Some(oid);
        } else {
            let (parent, name) = split_parent(&dir);
            dirs.entry(parent.to_string()).or_default().push(TreeEntry {
                mode: FileMode::Tree,
                name: name.to_string(),
                oid,
            });
        }
    }

    match root {
        Some(oid) => Ok(oid),
        None => store.write_tree(&Tree::default()),
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

fn depth(dir: &str) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.matches('/').count() + 1
    }
}
