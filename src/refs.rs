//! Branch ref persistence
//!
//! History has a single mutable pointer: `refs/heads/main`, reached through
//! the symbolic `HEAD`. Every update goes through a `main.lock` file created
//! with `create_new`, the same convention git uses, so a concurrent writer
//! (another engine instance or a git command) is detected instead of
//! silently overwritten.

use crate::error::{Result, WaypointError};
use crate::index::INDEX_FILE_NAME;
use crate::object::Oid;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Branch every checkpoint is recorded on
pub const MAIN_REF: &str = "refs/heads/main";

/// Persistence of the branch ref and the staging index it governs
pub trait RefStore: Send + Sync {
    /// Current head commit, `None` before the first save
    fn read_ref(&self) -> Result<Option<Oid>>;

    /// Point the branch at `oid` unconditionally
    fn write_ref(&self, oid: &Oid) -> Result<()>;

    /// Point the branch at `new` only if it still points at `expected`
    ///
    /// # Errors
    ///
    /// - [`WaypointError::RefUpdateConflict`] if the ref moved or is locked
    fn compare_and_swap(&self, expected: Option<&Oid>, new: &Oid) -> Result<()>;

    /// Drop all staged entries
    fn clear_index(&self) -> Result<()>;
}

/// [`RefStore`] backed by the files of the object store directory
#[derive(Debug, Clone)]
pub struct FileRefStore {
    store_dir: PathBuf,
}

impl FileRefStore {
    /// Create a ref store over an initialized store directory
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        FileRefStore { store_dir: store_dir.into() }
    }

    /// Ref name `HEAD` points to; falls back to `refs/heads/main`
    fn head_target(&self) -> String {
        fs::read_to_string(self.store_dir.join("HEAD"))
            .ok()
            .and_then(|head| head.trim().strip_prefix("ref: ").map(str::to_string))
            .unwrap_or_else(|| MAIN_REF.to_string())
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.store_dir.join(name)
    }

    /// Look the ref up in `packed-refs` (written by `git pack-refs`/`git gc`)
    fn read_packed(&self, name: &str) -> Result<Option<Oid>> {
        let packed = match fs::read_to_string(self.store_dir.join("packed-refs")) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WaypointError::store("reading packed-refs", e)),
        };
        for line in packed.lines() {
            if line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            if let Some((oid, ref_name)) = line.split_once(' ') {
                if ref_name.trim() == name {
                    return oid.parse().map(Some);
                }
            }
        }
        Ok(None)
    }

    fn read_named(&self, name: &str) -> Result<Option<Oid>> {
        match fs::read_to_string(self.ref_path(name)) {
            Ok(content) => content.trim().parse().map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => self.read_packed(name),
            Err(e) => Err(WaypointError::store(format!("reading {}", name), e)),
        }
    }

    fn lock(&self, name: &str) -> Result<RefLock> {
        let path = self.ref_path(name);
        let lock_path = path.with_file_name(format!(
            "{}.lock",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        ));
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| WaypointError::store(format!("creating {}", parent.display()), e))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => Ok(RefLock { file: Some(file), lock_path, target: path, committed: false }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(WaypointError::RefUpdateConflict {
                ref_name: name.to_string(),
                expected: "unlocked".to_string(),
                actual: format!("locked by {}", lock_path.display()),
            }),
            Err(e) => Err(WaypointError::store(format!("locking {}", name), e)),
        }
    }
}

impl RefStore for FileRefStore {
    fn read_ref(&self) -> Result<Option<Oid>> {
        self.read_named(&self.head_target())
    }

    fn write_ref(&self, oid: &Oid) -> Result<()> {
        let name = self.head_target();
        self.lock(&name)?.commit(oid)?;
        debug!("{} -> {}", name, oid.short());
        Ok(())
    }

    fn compare_and_swap(&self, expected: Option<&Oid>, new: &Oid) -> Result<()> {
        let name = self.head_target();
        let lock = self.lock(&name)?;

        let actual = self.read_named(&name)?;
        if actual.as_ref() != expected {
            let render = |oid: Option<&Oid>| oid.map(Oid::to_hex).unwrap_or_else(|| "<none>".to_string());
            return Err(WaypointError::RefUpdateConflict {
                ref_name: name,
                expected: render(expected),
                actual: render(actual.as_ref()),
            });
        }

        lock.commit(new)?;
        debug!("{} advanced to {}", name, new.short());
        Ok(())
    }

    fn clear_index(&self) -> Result<()> {
        match fs::remove_file(self.store_dir.join(INDEX_FILE_NAME)) {
            Ok(()) => {
                trace!("Cleared staging index");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WaypointError::store("clearing staging index", e)),
        }
    }
}

/// Held `<ref>.lock`; removed on drop unless committed
struct RefLock {
    file: Option<fs::File>,
    lock_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl RefLock {
    fn commit(mut self, oid: &Oid) -> Result<()> {
        let context = |e| WaypointError::store(format!("updating {}", self.target.display()), e);
        if let Some(mut file) = self.file.take() {
            file.write_all(format!("{}\n", oid).as_bytes()).map_err(context)?;
            file.sync_all().map_err(context)?;
        }
        fs::rename(&self.lock_path, &self.target).map_err(context)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for RefLock {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

/// Whether a ref lock is currently held for the main branch
pub fn is_locked(store_dir: &Path) -> bool {
    store_dir.join(format!("{}.lock", MAIN_REF)).exists()
}
