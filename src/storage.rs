//! Loose object store
//!
//! Objects are written the way git writes loose objects: the encoded object
//! (header + payload) is zlib-compressed and stored under
//! `objects/<first 2 hex chars>/<remaining 38 hex chars>`.
//!
//! ```text
//! .waypoint/
//! ├── HEAD              "ref: refs/heads/main"
//! ├── config            minimal bare-repository config
//! ├── description
//! ├── objects/
//! │   ├── info/
//! │   ├── pack/
//! │   └── <xx>/<yyyy…>  zlib loose objects
//! └── refs/
//!     ├── heads/
//!     └── tags/
//! ```
//!
//! Writes go to a temporary file in the shard directory and are renamed into
//! place, so a crash never leaves a truncated object behind. Objects are
//! immutable: writing an object that already exists is a no-op.

use crate::error::{Result, WaypointError};
use crate::object::{decode_object, encode_object, hash_object, Commit, FileMode, ObjectKind, Oid, Tree};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Minimum length of an abbreviated object id accepted by [`ObjectStore::find_by_prefix`]
pub const MIN_PREFIX_LEN: usize = 4;

const GIT_CONFIG: &str = "[core]\n\
\trepositoryformatversion = 0\n\
\tfilemode = true\n\
\tbare = true\n";

const DESCRIPTION: &str = "Waypoint checkpoint history; inspect with git --git-dir.\n";

/// Blob reachable from a tree, as seen through [`ObjectStore::flatten_tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatEntry {
    /// Mode recorded in the tree
    pub mode: FileMode,
    /// Blob identifier
    pub oid: Oid,
}

/// Git-compatible loose object store rooted at the store directory
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Create the store skeleton, keeping anything that already exists
    ///
    /// Returns `true` if the skeleton had to be created, `false` if a valid
    /// store was already present.
    pub fn init(root: &Path) -> Result<(Self, bool)> {
        let store = ObjectStore { root: root.to_path_buf() };
        if store.is_valid() {
            debug!("Object store already present at {:?}", root);
            return Ok((store, false));
        }

        for dir in ["objects/info", "objects/pack", "refs/heads", "refs/tags"] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| WaypointError::store(format!("creating {}", path.display()), e))?;
        }

        store.write_if_missing("HEAD", "ref: refs/heads/main\n")?;
        store.write_if_missing("config", GIT_CONFIG)?;
        store.write_if_missing("description", DESCRIPTION)?;

        info!("Initialized object store at {:?}", root);
        Ok((store, true))
    }

    /// Open an existing store
    ///
    /// # Errors
    ///
    /// - [`WaypointError::RepositoryNotInitialized`] if `HEAD`, `objects/` or
    ///   `refs/heads/` is missing
    pub fn open(root: &Path) -> Result<Self> {
        let store = ObjectStore { root: root.to_path_buf() };
        if !store.is_valid() {
            return Err(WaypointError::RepositoryNotInitialized(root.to_path_buf()));
        }
        Ok(store)
    }

    /// Whether the minimal store layout is present
    pub fn is_valid(&self) -> bool {
        self.root.join("HEAD").is_file()
            && self.root.join("objects").is_dir()
            && self.root.join("refs").join("heads").is_dir()
    }

    /// Store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_if_missing(&self, name: &str, content: &str) -> Result<()> {
        let path = self.root.join(name);
        if path.exists() {
            return Ok(());
        }
        fs::write(&path, content).map_err(|e| WaypointError::store(format!("writing {}", name), e))
    }

    fn object_path(&self, oid: &Oid) -> PathBuf {
        let hex = oid.to_hex();
        let (prefix, suffix) = hex.split_at(2);
        self.root.join("objects").join(prefix).join(suffix)
    }

    /// Check whether an object is present
    pub fn exists(&self, oid: &Oid) -> bool {
        self.object_path(oid).is_file()
    }

    /// Write an object, returning its identifier
    pub fn write(&self, kind: ObjectKind, payload: &[u8]) -> Result<Oid> {
        let oid = hash_object(kind, payload);
        let path = self.object_path(&oid);
        if path.is_file() {
            trace!("Object {} already stored", oid.short());
            return Ok(oid);
        }

        let shard = path
            .parent()
            .ok_or_else(|| WaypointError::corrupt(oid.to_hex(), "object path has no shard directory"))?;
        fs::create_dir_all(shard)
            .map_err(|e| WaypointError::store(format!("creating shard for {}", oid.short()), e))?;

        write_loose(shard, &path, &encode_object(kind, payload))
            .map_err(|e| WaypointError::store(format!("writing {} {}", kind, oid.short()), e))?;

        trace!("Stored {} {} ({} bytes)", kind, oid.short(), payload.len());
        Ok(oid)
    }

    /// Write a blob
    pub fn write_blob(&self, content: &[u8]) -> Result<Oid> {
        self.write(ObjectKind::Blob, content)
    }

    /// Write a tree
    pub fn write_tree(&self, tree: &Tree) -> Result<Oid> {
        self.write(ObjectKind::Tree, &tree.encode())
    }

    /// Write a commit
    pub fn write_commit(&self, commit: &Commit) -> Result<Oid> {
        self.write(ObjectKind::Commit, &commit.encode())
    }

    /// Read an object; `Ok(None)` if it does not exist
    ///
    /// The content is re-hashed and must match the identifier it is stored
    /// under.
    pub fn read(&self, oid: &Oid) -> Result<Option<(ObjectKind, Vec<u8>)>> {
        let path = self.object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WaypointError::store(format!("reading object {}", oid.short()), e)),
        };

        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut raw)
            .map_err(|e| WaypointError::corrupt(oid.to_hex(), format!("zlib: {}", e)))?;

        let (kind, payload) = decode_object(oid, &raw)?;
        if hash_object(kind, &payload) != *oid {
            return Err(WaypointError::corrupt(oid.to_hex(), "content does not match object id"));
        }
        Ok(Some((kind, payload)))
    }

    fn read_kind(&self, oid: &Oid, expected: ObjectKind) -> Result<Vec<u8>> {
        match self.read(oid)? {
            Some((kind, payload)) if kind == expected => Ok(payload),
            Some((kind, _)) => Err(WaypointError::corrupt(
                oid.to_hex(),
                format!("expected {}, found {}", expected, kind),
            )),
            None => Err(WaypointError::corrupt(oid.to_hex(), format!("missing {}", expected))),
        }
    }

    /// Read a commit
    ///
    /// # Errors
    ///
    /// - [`WaypointError::CommitNotFound`] if the object is absent or not a commit
    /// - [`WaypointError::ObjectStore`] on I/O failure
    pub fn read_commit(&self, oid: &Oid) -> Result<Commit> {
        match self.read(oid)? {
            Some((ObjectKind::Commit, payload)) => Commit::decode(*oid, &payload),
            _ => Err(WaypointError::CommitNotFound(oid.to_hex())),
        }
    }

    /// Read a tree referenced by another object
    pub fn read_tree(&self, oid: &Oid) -> Result<Tree> {
        let payload = self.read_kind(oid, ObjectKind::Tree)?;
        Tree::decode(oid, &payload)
    }

    /// Read a blob referenced by a tree
    pub fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        self.read_kind(oid, ObjectKind::Blob)
    }

    /// Flatten a tree into `tree path -> blob entry`, recursing into subtrees
    pub fn flatten_tree(&self, tree: &Oid) -> Result<BTreeMap<String, FlatEntry>> {
        let mut flat = BTreeMap::new();
        let mut pending = vec![(String::new(), *tree)];

        while let Some((prefix, oid)) = pending.pop() {
            for entry in self.read_tree(&oid)?.entries {
                let path = if prefix.is_empty() {
                    entry.name
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if entry.mode.is_tree() {
                    pending.push((path, entry.oid));
                } else {
                    flat.insert(path, FlatEntry { mode: entry.mode, oid: entry.oid });
                }
            }
        }
        Ok(flat)
    }

    /// Flatten the tree of a commit; an absent commit flattens to nothing
    pub fn flatten_commit(&self, commit: Option<&Oid>) -> Result<BTreeMap<String, FlatEntry>> {
        match commit {
            Some(oid) => {
                let commit = self.read_commit(oid)?;
                self.flatten_tree(&commit.tree)
            }
            None => Ok(BTreeMap::new()),
        }
    }

    /// Find all stored objects whose hex id starts with `prefix`
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Vec<Oid>> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.len() < MIN_PREFIX_LEN
            || prefix.len() > crate::object::OID_HEX_LEN
            || !prefix.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(WaypointError::InvalidOid(prefix));
        }

        let (shard, rest) = prefix.split_at(2);
        let shard_dir = self.root.join("objects").join(shard);
        let entries = match fs::read_dir(&shard_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WaypointError::store(format!("listing shard {}", shard), e)),
        };

        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| WaypointError::store(format!("listing shard {}", shard), e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(rest) {
                if let Ok(oid) = format!("{}{}", shard, name).parse::<Oid>() {
                    matches.push(oid);
                }
            }
        }
        matches.sort();
        Ok(matches)
    }
}

/// Compress `raw` into a temp file in `shard` and rename it to `path`
fn write_loose(shard: &Path, path: &Path, raw: &[u8]) -> std::io::Result<()> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    let compressed = encoder.finish()?;

    let mut temp = tempfile::NamedTempFile::new_in(shard)?;
    temp.write_all(&compressed)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
