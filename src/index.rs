//! Staging index for fast change detection
//!
//! The `StagingIndex` maps tree paths to the blob they were last staged as,
//! together with the cheap stat data (`size`, `mtime_ns`, mode) observed at
//! staging time. Comparing stat data lets the change detector skip reading
//! files that have not been touched since the last save.
//!
//! The index is advisory. It is stored as a bincode file named
//! `waypoint-index` in the store directory, so git never mistakes it for its
//! own `index`. A missing or undecodable file is treated as an empty index,
//! and `restore` clears it outright.
//!
//! The modification time of the index file itself is kept as the write
//! stamp. An entry whose `mtime_ns` is not older than that stamp is racy: the
//! file may have been edited again within the same timestamp tick, so its
//! stat data proves nothing.

use crate::error::Result;
use crate::object::{FileMode, Oid};
use crate::utils::{atomic_write, FileStat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, trace, warn};

/// File name of the staging index inside the store directory
pub const INDEX_FILE_NAME: &str = "waypoint-index";

const INDEX_FORMAT_VERSION: u32 = 1;

/// Staged state of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Blob the path was staged as
    pub oid: Oid,
    /// Size in bytes at staging time
    pub size: u64,
    /// Modification time (ns since epoch) at staging time
    pub mtime_ns: u64,
    /// Git mode at staging time
    pub mode: FileMode,
}

impl IndexEntry {
    /// Entry for a blob staged from a file with the given stat data
    pub fn new(oid: Oid, stat: &FileStat) -> Self {
        IndexEntry { oid, size: stat.size, mtime_ns: stat.mtime_ns, mode: stat.mode }
    }

    /// Whether the stat data still matches what was staged
    pub fn stat_matches(&self, stat: &FileStat) -> bool {
        self.size == stat.size && self.mtime_ns == stat.mtime_ns && self.mode == stat.mode
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: BTreeMap<String, IndexEntry>,
}

/// In-memory staging index persisted to `waypoint-index`
#[derive(Debug)]
pub struct StagingIndex {
    path: PathBuf,
    entries: BTreeMap<String, IndexEntry>,
    written_ns: Option<u64>,
    dirty: bool,
}

impl StagingIndex {
    /// Load the index from the store directory
    pub fn load(store_dir: &Path) -> Self {
        let path = store_dir.join(INDEX_FILE_NAME);
        let entries = match fs::read(&path) {
            Ok(bytes) => match bincode::serde::decode_from_slice::<IndexFile, _>(
                &bytes,
                bincode::config::standard(),
            ) {
                Ok((file, _)) if file.version == INDEX_FORMAT_VERSION => {
                    debug!("Loaded staging index with {} entries", file.entries.len());
                    file.entries
                }
                Ok((file, _)) => {
                    warn!("Ignoring staging index with unknown version {}", file.version);
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!("Ignoring unreadable staging index: {}", e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read staging index {:?}: {}", path, e);
                BTreeMap::new()
            }
        };

        let written_ns = if entries.is_empty() { None } else { modified_ns(&path) };
        StagingIndex { path, entries, written_ns, dirty: false }
    }

    /// Get the staged entry for a tree path
    pub fn get(&self, tree_path: &str) -> Option<&IndexEntry> {
        self.entries.get(tree_path)
    }

    /// Record a staged path
    pub fn insert(&mut self, tree_path: impl Into<String>, entry: IndexEntry) {
        let tree_path = tree_path.into();
        trace!("Staging {} as {}", tree_path, entry.oid.short());
        self.entries.insert(tree_path, entry);
        self.dirty = true;
    }

    /// Whether `entry` was staged too close to the index write to be trusted
    ///
    /// Entries that were never persisted have no stamp to race with.
    pub fn is_racy(&self, entry: &IndexEntry) -> bool {
        self.written_ns.is_some_and(|written| entry.mtime_ns >= written)
    }

    /// Keep only the paths for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let before = self.entries.len();
        self.entries.retain(|path, _| keep(path));
        if self.entries.len() != before {
            self.dirty = true;
        }
    }

    /// Number of staged paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate staged paths in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    /// Persist the index if anything changed since it was loaded
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let file = IndexFile { version: INDEX_FORMAT_VERSION, entries: self.entries.clone() };
        let bytes = bincode::serde::encode_to_vec(&file, bincode::config::standard())?;
        atomic_write(&self.path, &bytes)?;
        self.written_ns = modified_ns(&self.path);
        self.dirty = false;
        debug!("Persisted staging index ({} entries, {} bytes)", self.entries.len(), bytes.len());
        Ok(())
    }
}

fn modified_ns(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
}
