//! Main Waypoint implementation
//!
//! This module provides the [`Waypoint`] handle, the entry point for every
//! checkpoint operation on one project root, and [`WaypointBuilder`] for
//! configuring a new store.
//!
//! ## Overview
//!
//! `Waypoint` coordinates the subsystems of the engine:
//!
//! - **Object store**: git-compatible loose objects under `.waypoint/objects`
//! - **Ref store**: the `refs/heads/main` pointer and the staging index
//! - **Tree scanner**: lists trackable files using the ignore rules
//! - **Snapshot writer / restorer / history reader**: the operations themselves
//!
//! Ignore rules are rebuilt from `.gitignore` on every operation, so edits to
//! the ignore file take effect on the next save.
//!
//! ## Concurrency
//!
//! Operations run to completion on the calling thread. The handle holds no
//! interior mutability and is `Send + Sync`; share it behind an `Arc`.
//! Concurrent `save`/`restore` calls on the same root must be serialized by
//! the caller. A lost race on the branch ref surfaces as
//! [`WaypointError::RefUpdateConflict`].
//!
//! ## Examples
//!
//! ```rust,no_run
//! use waypoint::{RestoreMode, Waypoint};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (waypoint, _init) = Waypoint::initialize("./my_project")?;
//!
//! let first = waypoint.save(Some("before refactor"))?;
//! // ... agent edits files ...
//! waypoint.save(None)?;
//!
//! if let Some(oid) = first.oid {
//!     waypoint.restore(&oid.to_hex(), RestoreMode::Soft)?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, WaypointError};
use crate::history::HistoryReader;
use crate::ignore_rules::IgnoreResolver;
use crate::object::{Commit, Oid};
use crate::refs::FileRefStore;
use crate::restore::CheckpointRestorer;
use crate::scanner::TreeScanner;
use crate::snapshot::SnapshotWriter;
use crate::storage::ObjectStore;
use crate::types::*;
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// File name of the engine configuration inside the store directory
pub const CONFIG_FILE_NAME: &str = "waypoint.json";

/// Message of the optional checkpoint recorded by `initialize`
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial checkpoint";

/// Checkpoint engine for one project root
#[derive(Debug)]
pub struct Waypoint {
    /// Project root being tracked
    root: PathBuf,
    /// Loose object store
    store: ObjectStore,
    /// Branch ref and staging index
    refs: FileRefStore,
    /// Loaded configuration
    config: WaypointConfig,
}

impl Waypoint {
    /// Initialize a store with default settings
    ///
    /// See [`WaypointBuilder::initialize`].
    pub fn initialize(root: impl AsRef<Path>) -> Result<(Self, InitResult)> {
        WaypointBuilder::new().initialize(root)
    }

    /// Open an existing store under the default directory name
    ///
    /// # Errors
    ///
    /// - [`WaypointError::RepositoryNotInitialized`] if no valid store exists
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        WaypointBuilder::new().open(root)
    }

    #[instrument(skip(config))]
    fn open_with(root: &Path, config: WaypointConfig) -> Result<Self> {
        let store_dir = root.join(&config.store_dir_name);
        let store = ObjectStore::open(&store_dir)?;

        let config = load_config(&store_dir, config);
        info!("Opened checkpoint store at {:?}", store_dir);

        Ok(Self {
            root: root.to_path_buf(),
            refs: FileRefStore::new(&store_dir),
            store,
            config,
        })
    }

    /// Project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store directory
    pub fn store_path(&self) -> &Path {
        self.store.root()
    }

    /// Active configuration
    pub fn config(&self) -> &WaypointConfig {
        &self.config
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.store.is_valid() {
            Ok(())
        } else {
            Err(WaypointError::RepositoryNotInitialized(self.store.root().to_path_buf()))
        }
    }

    fn scanner(&self) -> Result<TreeScanner> {
        let rules = IgnoreResolver::new(&self.root, &self.config.store_dir_name, &self.config.ignore_patterns)?;
        Ok(TreeScanner::new(self.root.clone(), rules).with_max_file_size(self.config.max_file_size))
    }

    fn history(&self) -> HistoryReader<'_> {
        HistoryReader::new(&self.store, &self.refs)
    }

    /// Record a checkpoint of the working directory
    ///
    /// Returns [`SaveStatus::NoChanges`] without writing anything when the
    /// working directory matches head. Without a message, the commit is
    /// titled `Checkpoint: <UTC timestamp>`.
    ///
    /// # Errors
    ///
    /// - [`WaypointError::RepositoryNotInitialized`] if the store is gone
    /// - [`WaypointError::RefUpdateConflict`] if head moved during the save
    #[instrument(skip(self))]
    pub fn save(&self, message: Option<&str>) -> Result<SaveResult> {
        self.ensure_initialized()?;
        let scanner = self.scanner()?;
        SnapshotWriter::new(&self.root, &self.store, &self.refs, &scanner, &self.config.identity)
            .save(message)
    }

    /// Current head commit
    ///
    /// # Errors
    ///
    /// - [`WaypointError::NoHead`] before the first checkpoint
    pub fn head_oid(&self) -> Result<Oid> {
        self.ensure_initialized()?;
        self.history().head_oid()
    }

    /// History newest first, at most `depth` commits, from `start` or head
    #[instrument(skip(self))]
    pub fn log(&self, depth: Option<usize>, start: Option<Oid>) -> Result<LogResult> {
        self.ensure_initialized()?;
        self.history().log(depth, start)
    }

    /// Load one commit
    ///
    /// # Errors
    ///
    /// - [`WaypointError::CommitNotFound`] if `oid` is not a stored commit
    pub fn commit(&self, oid: &Oid) -> Result<Commit> {
        self.ensure_initialized()?;
        self.history().commit(oid)
    }

    /// Whether a save would record anything, and which paths
    #[instrument(skip(self))]
    pub fn has_changes(&self) -> Result<ChangeSummary> {
        self.ensure_initialized()?;
        let scanner = self.scanner()?;
        SnapshotWriter::new(&self.root, &self.store, &self.refs, &scanner, &self.config.identity)
            .pending_changes()
    }

    /// Rewind the branch and working directory to `target`
    ///
    /// `target` may be a full commit id, a unique prefix of at least four hex
    /// characters, or `HEAD`. An unknown target is returned as
    /// [`RestoreOutcome::CommitNotFound`].
    #[instrument(skip(self))]
    pub fn restore(&self, target: &str, mode: RestoreMode) -> Result<RestoreOutcome> {
        self.ensure_initialized()?;
        let scanner = self.scanner()?;
        CheckpointRestorer::new(&self.root, &self.store, &self.refs, &scanner).restore(target, mode)
    }

    /// Resolve `HEAD`, a full id or a unique prefix to a commit id
    pub fn resolve(&self, rev: &str) -> Result<Oid> {
        self.ensure_initialized()?;
        self.history().resolve(rev)
    }

    /// Content of `path` at checkpoint `oid`
    pub fn read_file_at(&self, oid: &Oid, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        self.ensure_initialized()?;
        self.history().read_file_at(oid, path.as_ref())
    }
}

/// Read `waypoint.json`, falling back to `defaults` when absent or unreadable
fn load_config(store_dir: &Path, defaults: WaypointConfig) -> WaypointConfig {
    let path = store_dir.join(CONFIG_FILE_NAME);
    let mut config = match fs::read_to_string(&path) {
        Ok(json) => match serde_json::from_str::<WaypointConfig>(&json) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring unreadable {:?}: {}", path, e);
                defaults.clone()
            }
        },
        Err(e) => {
            warn!("No configuration at {:?} ({}), using defaults", path, e);
            defaults.clone()
        }
    };
    // the directory we opened wins over whatever the file says
    config.store_dir_name = defaults.store_dir_name;
    config
}

/// Builder for configuring Waypoint
///
/// Options apply when a store is created; [`open`](Self::open) only uses the
/// store directory name and reads everything else from `waypoint.json`.
///
/// # Examples
///
/// ```rust,no_run
/// use waypoint::WaypointBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let (waypoint, result) = WaypointBuilder::new()
///     .ignore_patterns(vec!["*.log".to_string(), "node_modules/".to_string()])
///     .max_file_size(50 * 1024 * 1024)
///     .initial_commit(true)
///     .initialize("./my_project")?;
/// println!("initial checkpoint: {:?}", result.initial_commit_oid);
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// - `store_dir_name`: `.waypoint`
/// - `ignore_patterns`: empty (the store and VCS directories are always ignored)
/// - `identity`: `Waypoint <checkpoints@waypoint.local>`
/// - `initial_commit`: false
/// - `max_file_size`: 0 (no limit)
#[derive(Debug, Clone, Default)]
pub struct WaypointBuilder {
    config: WaypointConfig,
}

impl WaypointBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the store directory under the project root
    pub fn store_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.store_dir_name = name.into();
        self
    }

    /// Extra gitignore-style patterns applied on top of `.gitignore`
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore_patterns = patterns;
        self
    }

    /// Author and committer recorded on checkpoints
    pub fn identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.config.identity = Identity { name: name.into(), email: email.into() };
        self
    }

    /// Record a checkpoint of the initial state during `initialize`
    pub fn initial_commit(mut self, enabled: bool) -> Self {
        self.config.initial_commit = enabled;
        self
    }

    /// Skip files larger than `size` bytes (0 = no limit)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Create the store under `root`, or report it as already present
    ///
    /// On creation this writes the store skeleton and `waypoint.json`, adds
    /// the store directory to `.gitignore`, and records the initial
    /// checkpoint when configured. An existing valid store is left untouched
    /// and reported as [`InitStatus::Skipped`].
    ///
    /// # Errors
    ///
    /// - [`WaypointError::Io`] if `root` is not a directory
    /// - [`WaypointError::ObjectStore`] if the store cannot be created
    #[instrument(skip(self, root), fields(root = %root.as_ref().display()))]
    pub fn initialize(self, root: impl AsRef<Path>) -> Result<(Waypoint, InitResult)> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(WaypointError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Project root {:?} is not a directory", root),
            )));
        }

        let store_dir = root.join(&self.config.store_dir_name);
        let (_, created) = ObjectStore::init(&store_dir)?;
        if !created {
            info!("Checkpoint store already initialized at {:?}", store_dir);
            let waypoint = Waypoint::open_with(root, self.config)?;
            return Ok((
                waypoint,
                InitResult { status: InitStatus::Skipped, ignore_file_updated: false, initial_commit_oid: None },
            ));
        }

        let config_json = serde_json::to_string_pretty(&self.config)?;
        utils::atomic_write(&store_dir.join(CONFIG_FILE_NAME), config_json.as_bytes())
            .map_err(|e| match e {
                WaypointError::Io(source) => WaypointError::store("writing configuration", source),
                other => other,
            })?;

        let ignore_file_updated =
            match utils::ensure_gitignore_has_entry(&root.join(".gitignore"), &self.config.store_dir_name) {
                Ok(updated) => updated,
                Err(e) => {
                    warn!("Failed to update .gitignore: {}", e);
                    false
                }
            };

        let waypoint = Waypoint::open_with(root, self.config)?;

        let initial_commit_oid = if waypoint.config.initial_commit {
            let scanner = waypoint.scanner()?;
            SnapshotWriter::new(&waypoint.root, &waypoint.store, &waypoint.refs, &scanner, &waypoint.config.identity)
                .save_allow_empty(Some(INITIAL_COMMIT_MESSAGE))?
                .oid
        } else {
            None
        };

        info!("Initialized checkpoint store at {:?}", store_dir);
        debug!("ignore file updated: {}, initial commit: {:?}", ignore_file_updated, initial_commit_oid);

        Ok((
            waypoint,
            InitResult { status: InitStatus::Success, ignore_file_updated, initial_commit_oid },
        ))
    }

    /// Open an existing store under `root`
    pub fn open(self, root: impl AsRef<Path>) -> Result<Waypoint> {
        Waypoint::open_with(root.as_ref(), self.config)
    }
}
