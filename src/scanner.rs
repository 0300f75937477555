//! Working directory scanning
//!
//! `TreeScanner` walks the project depth-first and lists every trackable
//! path: regular files and symlinks that the [`IgnoreResolver`] does not
//! exclude. Excluded directories are pruned without being descended into.
//!
//! The walk is exhaustive but forgiving: an unreadable directory or entry is
//! logged with `warn!` and skipped, never aborting the scan. Symlinks are
//! recorded as links and never followed. Directories are not entries of their
//! own, so empty directories are not tracked (the same as git).
//!
//! ## Example
//!
//! ```rust,ignore
//! use waypoint::ignore_rules::IgnoreResolver;
//! use waypoint::scanner::TreeScanner;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let root = Path::new("./project");
//! let rules = IgnoreResolver::new(root, ".waypoint", &[])?;
//! let scanner = TreeScanner::new(root.to_path_buf(), rules);
//!
//! for path in scanner.list_trackable_files() {
//!     println!("{}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

use crate::ignore_rules::IgnoreResolver;
use crate::utils::{self, FileStat};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// A trackable path found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the project root
    pub path: PathBuf,
    /// `/`-separated form used in trees and the staging index
    pub tree_path: String,
    /// Stat data observed during the walk
    pub stat: FileStat,
}

/// Depth-first walker over the trackable files of a project
#[derive(Debug, Clone)]
pub struct TreeScanner {
    /// Root directory to scan
    root: PathBuf,
    /// Exclusion rules
    rules: IgnoreResolver,
    /// Maximum file size to track in bytes (0 = unlimited)
    max_file_size: u64,
}

impl TreeScanner {
    /// Create a scanner with no size limit
    pub fn new(root: PathBuf, rules: IgnoreResolver) -> Self {
        Self { root, rules, max_file_size: 0 }
    }

    /// Skip regular files larger than `size` bytes (0 = unlimited)
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Rules the scanner applies
    pub fn rules(&self) -> &IgnoreResolver {
        &self.rules
    }

    /// Relative paths of every trackable file, in walk order
    pub fn list_trackable_files(&self) -> Vec<PathBuf> {
        self.scan().into_iter().map(|file| file.path).collect()
    }

    /// Walk the project and collect trackable files with their stat data
    pub fn scan(&self) -> Vec<ScannedFile> {
        let start = Instant::now();
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !self.rules.is_excluded_entry(
                        self.relative(entry.path()),
                        entry.file_type().is_dir(),
                    )
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() || !(file_type.is_file() || file_type.is_symlink()) {
                continue;
            }

            let path = self.relative(entry.path()).to_path_buf();
            let Some(tree_path) = utils::to_tree_path(&path) else {
                warn!("Skipping path that cannot be stored in a tree: {:?}", path);
                continue;
            };

            let stat = match entry.metadata() {
                Ok(metadata) => match FileStat::from_metadata(&metadata) {
                    Some(stat) => stat,
                    None => continue,
                },
                Err(e) => {
                    warn!("Error reading metadata for {:?}: {}", path, e);
                    continue;
                }
            };

            if self.max_file_size > 0 && stat.mode != crate::object::FileMode::Symlink && stat.size > self.max_file_size {
                debug!(
                    "Skipping {} ({} exceeds limit of {})",
                    tree_path,
                    utils::format_bytes(stat.size),
                    utils::format_bytes(self.max_file_size)
                );
                continue;
            }

            trace!("Found {}", tree_path);
            files.push(ScannedFile { path, tree_path, stat });
        }

        debug!("Scanned {} trackable files in {:?}", files.len(), start.elapsed());
        files
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}
