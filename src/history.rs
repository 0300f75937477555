//! Read access to checkpoint history
//!
//! History is linear: every checkpoint has at most one parent, and the log
//! walk follows first parents from the starting commit back to the root.

use crate::error::{Result, WaypointError};
use crate::object::{Commit, ObjectKind, Oid, OID_HEX_LEN};
use crate::refs::RefStore;
use crate::storage::ObjectStore;
use crate::types::LogResult;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, trace};

/// Reads commits, the head pointer and file contents at past checkpoints
pub struct HistoryReader<'a> {
    store: &'a ObjectStore,
    refs: &'a dyn RefStore,
}

impl<'a> HistoryReader<'a> {
    /// Create a reader over an opened repository
    pub fn new(store: &'a ObjectStore, refs: &'a dyn RefStore) -> Self {
        Self { store, refs }
    }

    /// Current head commit
    ///
    /// # Errors
    ///
    /// - [`WaypointError::NoHead`] before the first checkpoint
    pub fn head_oid(&self) -> Result<Oid> {
        self.refs.read_ref()?.ok_or(WaypointError::NoHead)
    }

    /// Load a commit by id
    pub fn commit(&self, oid: &Oid) -> Result<Commit> {
        self.store.read_commit(oid)
    }

    /// Walk history from `start` (default head), newest first
    ///
    /// At most `depth` commits are returned. An empty history is an empty
    /// result, not an error.
    pub fn log(&self, depth: Option<usize>, start: Option<Oid>) -> Result<LogResult> {
        let start = match start {
            Some(oid) => oid,
            None => match self.head_oid() {
                Ok(oid) => oid,
                Err(WaypointError::NoHead) => return Ok(LogResult::default()),
                Err(e) => return Err(e),
            },
        };

        let limit = depth.unwrap_or(usize::MAX);
        let mut commits = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(start);

        while let Some(oid) = next {
            if commits.len() >= limit || !seen.insert(oid) {
                break;
            }
            let commit = self.store.read_commit(&oid)?;
            trace!("log: {} {}", oid.short(), commit.summary());
            next = commit.parent();
            commits.push(commit);
        }

        debug!("Walked {} commits from {}", commits.len(), start.short());
        Ok(LogResult { total_count: commits.len(), commits })
    }

    /// Number of commits walked from `from` before reaching `target`
    ///
    /// `None` if the walk fails or never reaches `target`.
    pub fn distance(&self, from: &Oid, target: &Oid) -> Option<usize> {
        let mut seen = HashSet::new();
        let mut current = *from;
        let mut walked = 0;

        loop {
            if current == *target {
                return Some(walked);
            }
            if !seen.insert(current) {
                return None;
            }
            let commit = self.store.read_commit(&current).ok()?;
            current = commit.parent()?;
            walked += 1;
        }
    }

    /// Resolve `HEAD`, a full id or a unique abbreviated id to a commit
    ///
    /// # Errors
    ///
    /// - [`WaypointError::CommitNotFound`] if nothing matches
    /// - [`WaypointError::AmbiguousOid`] if a prefix names several commits
    pub fn resolve(&self, rev: &str) -> Result<Oid> {
        let rev = rev.trim();
        if rev.eq_ignore_ascii_case("HEAD") {
            return self.head_oid();
        }

        if rev.len() == OID_HEX_LEN {
            let oid: Oid = rev.to_ascii_lowercase().parse()?;
            self.store.read_commit(&oid)?;
            return Ok(oid);
        }

        let mut commits = Vec::new();
        for oid in self.store.find_by_prefix(rev)? {
            if let Some((ObjectKind::Commit, _)) = self.store.read(&oid)? {
                commits.push(oid);
            }
        }

        match commits.len() {
            0 => Err(WaypointError::CommitNotFound(rev.to_string())),
            1 => Ok(commits[0]),
            candidates => Err(WaypointError::AmbiguousOid { prefix: rev.to_string(), candidates }),
        }
    }

    /// Content of `path` as recorded in commit `oid`
    ///
    /// # Errors
    ///
    /// - [`WaypointError::CommitNotFound`] if `oid` is not a commit
    /// - [`WaypointError::PathNotFound`] if the path is not a file in that commit
    pub fn read_file_at(&self, oid: &Oid, path: &Path) -> Result<Vec<u8>> {
        let not_found = || WaypointError::PathNotFound { path: path.to_path_buf(), oid: oid.to_hex() };
        let tree_path = crate::utils::to_tree_path(path).ok_or_else(not_found)?;

        let commit = self.store.read_commit(oid)?;
        let mut tree = self.store.read_tree(&commit.tree)?;
        let mut segments = tree_path.split('/').peekable();

        while let Some(segment) = segments.next() {
            let entry = tree.get(segment).ok_or_else(not_found)?.clone();
            match (segments.peek().is_some(), entry.mode.is_tree()) {
                (true, true) => tree = self.store.read_tree(&entry.oid)?,
                (false, false) => return self.store.read_blob(&entry.oid),
                _ => return Err(not_found()),
            }
        }
        Err(not_found())
    }
}
