//! Utility functions for Waypoint
//!
//! Small filesystem helpers shared by the scanner, the snapshot writer and the
//! restorer.
//!
//! ## Categories of Utilities
//!
//! ### File Metadata
//! - Cheap stat data (`size`, `mtime_ns`, git mode) for the staging index
//! - Reading the bytes git stores for a path (file content or symlink target)
//!
//! ### Path Manipulation
//! - Converting between OS paths and `/`-separated tree paths
//! - Making walked paths relative to the project root
//!
//! ### Writing
//! - Atomic file writes for engine-owned files
//! - Executable bit and symlink creation (cross-platform)
//! - Idempotent `.gitignore` maintenance

use crate::error::{Result, WaypointError};
use crate::object::FileMode;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, trace};

/// Stat data recorded in the staging index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Git mode derived from the file type and executable bit
    pub mode: FileMode,
    /// Size in bytes (length of the link target for symlinks)
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime_ns: u64,
}

impl FileStat {
    /// Build from `symlink_metadata`; `None` for directories and special files
    pub fn from_metadata(metadata: &fs::Metadata) -> Option<Self> {
        let file_type = metadata.file_type();
        let mode = if file_type.is_symlink() {
            FileMode::Symlink
        } else if file_type.is_file() {
            if is_executable(metadata) {
                FileMode::Executable
            } else {
                FileMode::Regular
            }
        } else {
            return None;
        };

        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Some(FileStat { mode, size: metadata.len(), mtime_ns })
    }
}

/// Stat a path without following symlinks
///
/// Returns `Ok(None)` if the path does not exist or is not a file/symlink.
pub fn file_stat(path: &Path) -> Result<Option<FileStat>> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(FileStat::from_metadata(&metadata)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Apply or clear the executable bits (owner/group/other, where readable)
#[cfg(unix)]
pub fn set_executable(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut mode = fs::metadata(path)?.permissions().mode();
    if executable {
        // mirror read bits into execute bits
        mode |= (mode & 0o444) >> 2;
    } else {
        mode &= !0o111;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Executable bit is not represented on this platform
#[cfg(not(unix))]
pub fn set_executable(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

/// Bytes git stores for a path: file content, or the link target for symlinks
pub fn read_tracked_content(path: &Path, mode: FileMode) -> Result<Vec<u8>> {
    match mode {
        FileMode::Symlink => Ok(link_target_bytes(&fs::read_link(path)?)),
        _ => Ok(fs::read(path)?),
    }
}

#[cfg(unix)]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().replace('\\', "/").into_bytes()
}

/// Create a symlink whose target is the raw bytes stored in a blob
#[cfg(unix)]
pub fn create_symlink(target: &[u8], link: &Path) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(OsStr::from_bytes(target), link)?;
    Ok(())
}

/// Create a symlink (Windows); directory links are chosen when the target exists as a directory
#[cfg(windows)]
pub fn create_symlink(target: &[u8], link: &Path) -> Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};
    let target = PathBuf::from(String::from_utf8_lossy(target).replace('/', "\\"));
    let resolved = link.parent().map(|p| p.join(&target)).unwrap_or_else(|| target.clone());
    if resolved.is_dir() {
        symlink_dir(&target, link)?;
    } else {
        symlink_file(&target, link)?;
    }
    Ok(())
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Make a path relative to a base path
///
/// A lexical strip is tried first so symlinked paths keep their own name;
/// canonicalization is only the fallback.
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            WaypointError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Path {:?} is not relative to {:?}", path_canon, base_canon),
            ))
        })
}

/// Render a relative path as a `/`-separated tree path
///
/// Returns `None` for paths with non-UTF-8 or non-normal components.
pub fn to_tree_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolve a `/`-separated tree path under `root`
pub fn from_tree_path(root: &Path, tree_path: &str) -> PathBuf {
    tree_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Format bytes in human-readable form (1024-based units)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file is created next to the target so the rename never
/// crosses filesystems; it is removed automatically if any step fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Make sure `.gitignore` excludes the store directory
///
/// Appends `/<store_dir_name>/` unless some line already names the store
/// (with or without leading/trailing slashes). Creates the file if missing.
/// Returns `true` if the file was modified.
pub fn ensure_gitignore_has_entry(gitignore_path: &Path, store_dir_name: &str) -> Result<bool> {
    let existing = match fs::read_to_string(gitignore_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let wanted = store_dir_name.trim_matches('/');
    let already_listed = existing
        .lines()
        .map(|line| line.trim().trim_matches('/'))
        .any(|line| line == wanted);
    if already_listed {
        debug!("{:?} already excludes {}", gitignore_path, wanted);
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!("/{}/\n", wanted));
    fs::write(gitignore_path, updated)?;
    debug!("Added /{}/ to {:?}", wanted, gitignore_path);
    Ok(true)
}
