//! Ignore rule resolution
//!
//! Decides whether a path inside the project is excluded from checkpoints.
//! Two layers apply, in order:
//!
//! 1. **Hard exclusions**: the object-store directory and VCS metadata
//!    directories (`.git`, `.hg`, `.svn`) anywhere in the path. Negation
//!    patterns cannot bring these back.
//! 2. **Gitignore rules**: every `.gitignore` in the project, each scoped to
//!    its own directory, then the configured extra patterns. For a given
//!    path the deepest ignore file with a matching line decides, and a path
//!    below an ignored directory stays ignored.
//!
//! Ignore files are discovered once, when the resolver is built, by walking
//! the directories that are not themselves excluded. Lines that fail to
//! compile are logged and skipped rather than rejecting the whole rule set.
//! Paths outside the root are always excluded.

use crate::error::{Result, WaypointError};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// VCS metadata directories that are never tracked
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// File name of per-directory ignore files
pub const IGNORE_FILE_NAME: &str = ".gitignore";

/// Answers "is this path excluded?" for one project root
#[derive(Debug, Clone)]
pub struct IgnoreResolver {
    root: PathBuf,
    store_dir_name: String,
    /// Ignore files keyed by the directory they live in (relative, `""` for the root)
    ignore_files: BTreeMap<PathBuf, Gitignore>,
    /// Configured patterns, consulted after every ignore file
    extra: Gitignore,
}

impl IgnoreResolver {
    /// Build the rule set from the project's `.gitignore` files and `extra_patterns`
    ///
    /// # Errors
    ///
    /// - [`WaypointError::InvalidPattern`] if the extra patterns cannot be built at all
    pub fn new(root: &Path, store_dir_name: &str, extra_patterns: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in extra_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }
        let extra = builder
            .build()
            .map_err(|e| WaypointError::InvalidPattern(e.to_string()))?;

        let mut resolver = IgnoreResolver {
            root: root.to_path_buf(),
            store_dir_name: store_dir_name.to_string(),
            ignore_files: BTreeMap::new(),
            extra,
        };
        resolver.discover_ignore_files();
        debug!(
            "Loaded {} ignore files and {} extra patterns for {:?}",
            resolver.ignore_files.len(),
            resolver.extra.num_ignores() + resolver.extra.num_whitelists(),
            root
        );
        Ok(resolver)
    }

    /// Load the ignore file of the root and of every directory not excluded
    ///
    /// Parents are loaded before their children, so an ignored directory is
    /// pruned before its own ignore file is read.
    fn discover_ignore_files(&mut self) {
        self.load_ignore_file(Path::new(""));

        let mut walker = WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry while loading ignore files: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let relative = self.relative(entry.path());
            if self.is_excluded_entry(&relative, true) {
                walker.skip_current_dir();
                continue;
            }
            self.load_ignore_file(&relative);
        }
    }

    fn load_ignore_file(&mut self, dir: &Path) {
        let base = self.root.join(dir);
        let path = base.join(IGNORE_FILE_NAME);
        if !path.is_file() {
            return;
        }

        let mut builder = GitignoreBuilder::new(&base);
        if let Some(err) = builder.add(&path) {
            warn!("Skipping invalid lines in {:?}: {}", path, err);
        }
        match builder.build() {
            Ok(matcher) => {
                self.ignore_files.insert(dir.to_path_buf(), matcher);
            }
            Err(e) => warn!("Ignoring unusable ignore file {:?}: {}", path, e),
        }
    }

    /// Whether `path` (relative to the root, or absolute under it) is excluded
    ///
    /// The directory flag needed by directory-only patterns (`build/`) is
    /// taken from the filesystem; missing paths are treated as files.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let relative = self.relative(path);
        if is_outside(&relative) {
            return true;
        }
        let is_dir = fs::symlink_metadata(self.root.join(&relative))
            .map(|m| m.is_dir())
            .unwrap_or(false);
        self.is_excluded_entry(&relative, is_dir)
    }

    /// Same as [`is_excluded`](Self::is_excluded) with a known directory flag
    pub fn is_excluded_entry(&self, path: &Path, is_dir: bool) -> bool {
        let relative = self.relative(path);
        if relative.as_os_str().is_empty() {
            return false;
        }
        if is_outside(&relative) || self.is_hard_excluded(&relative) {
            return true;
        }

        // an ignored parent directory excludes everything below it
        let mut prefix = PathBuf::new();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            prefix.push(component);
            let prefix_is_dir = components.peek().is_some() || is_dir;
            if self.matched(&prefix, prefix_is_dir).is_ignore() {
                return true;
            }
        }
        false
    }

    /// Decision for one path, ignoring its parents
    fn matched(&self, relative: &Path, is_dir: bool) -> Match<()> {
        let absolute = self.root.join(relative);
        for dir in relative.ancestors().skip(1) {
            if let Some(matcher) = self.ignore_files.get(dir) {
                match matcher.matched(&absolute, is_dir) {
                    Match::None => {}
                    Match::Ignore(_) => return Match::Ignore(()),
                    Match::Whitelist(_) => return Match::Whitelist(()),
                }
            }
        }
        self.extra.matched(&absolute, is_dir).map(|_| ())
    }

    fn is_hard_excluded(&self, relative: &Path) -> bool {
        relative.components().any(|component| match component {
            Component::Normal(name) => {
                name == OsStr::new(&self.store_dir_name)
                    || VCS_DIRS.iter().any(|vcs| name == OsStr::new(vcs))
            }
            _ => false,
        })
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }

    /// Project root the rules apply to
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Whether a root-relative path escapes the root
fn is_outside(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_) | Component::ParentDir))
}
