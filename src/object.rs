//! Git-compatible object model
//!
//! Blobs, trees and commits are encoded exactly the way git encodes them so
//! that the object store can be inspected with stock tooling
//! (`git --git-dir .waypoint log`, `git cat-file -p <oid>`).
//!
//! ## Encoding
//!
//! Every object is hashed over `"<kind> <payload-len>\0<payload>"` with SHA-1.
//! The 20-byte digest is the object identifier ([`Oid`]).
//!
//! ```text
//! tree payload   := *( <mode> SP <name> NUL <20 raw oid bytes> )
//! commit payload := "tree" SP <hex> LF
//!                   *( "parent" SP <hex> LF )
//!                   "author" SP <signature> LF
//!                   "committer" SP <signature> LF
//!                   LF <message>
//! signature      := <name> SP "<" <email> ">" SP <unix-seconds> SP <+HHMM>
//! ```

use crate::error::{Result, WaypointError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Length of a raw object identifier in bytes
pub const OID_LEN: usize = 20;

/// Length of a hex-encoded object identifier
pub const OID_HEX_LEN: usize = OID_LEN * 2;

/// Content-derived object identifier (SHA-1 of the encoded object)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; OID_LEN]);

impl Oid {
    /// Build an identifier from raw digest bytes
    pub fn from_bytes(bytes: [u8; OID_LEN]) -> Self {
        Oid(bytes)
    }

    /// Build an identifier from a slice, which must be exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; OID_LEN] = bytes
            .try_into()
            .map_err(|_| WaypointError::InvalidOid(hex::encode(bytes)))?;
        Ok(Oid(raw))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }

    /// Full 40-character lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated 8-character form used in logs and CLI output
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = WaypointError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != OID_HEX_LEN {
            return Err(WaypointError::InvalidOid(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| WaypointError::InvalidOid(s.to_string()))?;
        Oid::from_slice(&bytes)
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// File content
    Blob,
    /// Directory listing
    Tree,
    /// Snapshot metadata
    Commit,
}

impl ObjectKind {
    /// Name used in the object header
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }

    fn parse(name: &[u8]) -> Option<Self> {
        match name {
            b"blob" => Some(ObjectKind::Blob),
            b"tree" => Some(ObjectKind::Tree),
            b"commit" => Some(ObjectKind::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode an object with its `"<kind> <len>\0"` header
pub fn encode_object(kind: ObjectKind, payload: &[u8]) -> Vec<u8> {
    let header = format!("{} {}\0", kind.as_str(), payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Compute the identifier an object would be stored under
pub fn hash_object(kind: ObjectKind, payload: &[u8]) -> Oid {
    let mut hasher = Sha1::new();
    hasher.update(format!("{} {}\0", kind.as_str(), payload.len()).as_bytes());
    hasher.update(payload);
    Oid(hasher.finalize().into())
}

/// Split a decoded loose object into its kind and payload
pub fn decode_object(oid: &Oid, raw: &[u8]) -> Result<(ObjectKind, Vec<u8>)> {
    let nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| WaypointError::corrupt(oid.to_hex(), "missing header terminator"))?;
    let header = &raw[..nul];
    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| WaypointError::corrupt(oid.to_hex(), "malformed header"))?;

    let kind = ObjectKind::parse(&header[..space])
        .ok_or_else(|| WaypointError::corrupt(oid.to_hex(), "unknown object kind"))?;
    let len: usize = std::str::from_utf8(&header[space + 1..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| WaypointError::corrupt(oid.to_hex(), "invalid length"))?;

    let payload = &raw[nul + 1..];
    if payload.len() != len {
        return Err(WaypointError::corrupt(
            oid.to_hex(),
            format!("length mismatch: header says {}, payload is {}", len, payload.len()),
        ));
    }
    Ok((kind, payload.to_vec()))
}

/// Mode of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMode {
    /// Regular, non-executable file (`100644`)
    Regular,
    /// Executable file (`100755`)
    Executable,
    /// Symbolic link; the blob holds the link target (`120000`)
    Symlink,
    /// Subdirectory (`40000`)
    Tree,
}

impl FileMode {
    /// Octal string used in tree encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
            FileMode::Symlink => "120000",
            FileMode::Tree => "40000",
        }
    }

    /// Numeric mode
    pub fn bits(&self) -> u32 {
        match self {
            FileMode::Regular => 0o100644,
            FileMode::Executable => 0o100755,
            FileMode::Symlink => 0o120000,
            FileMode::Tree => 0o040000,
        }
    }

    fn parse(s: &[u8]) -> Option<Self> {
        match s {
            b"100644" | b"100664" => Some(FileMode::Regular),
            b"100755" => Some(FileMode::Executable),
            b"120000" => Some(FileMode::Symlink),
            b"40000" | b"040000" => Some(FileMode::Tree),
            _ => None,
        }
    }

    /// Whether the entry points at a subtree
    pub fn is_tree(&self) -> bool {
        matches!(self, FileMode::Tree)
    }
}

/// One entry of a tree object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry mode
    pub mode: FileMode,
    /// Single path segment
    pub name: String,
    /// Blob or subtree identifier
    pub oid: Oid,
}

impl TreeEntry {
    /// Git orders subtrees as though their name ended with `/`
    fn cmp_git(&self, other: &TreeEntry) -> Ordering {
        let a = self.name.as_bytes();
        let b = other.name.as_bytes();
        let common = a.len().min(b.len());
        match a[..common].cmp(&b[..common]) {
            Ordering::Equal => {}
            other => return other,
        }
        let next = |bytes: &[u8], mode: FileMode| -> u8 {
            match bytes.get(common) {
                Some(&c) => c,
                None if mode.is_tree() => b'/',
                None => 0,
            }
        };
        next(a, self.mode).cmp(&next(b, other.mode))
    }
}

/// A directory listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Entries in git order
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree, sorting entries into git order
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.cmp_git(b));
        Tree { entries }
    }

    /// Encode the tree payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_str().as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    /// Decode a tree payload
    pub fn decode(oid: &Oid, payload: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = payload;
        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| WaypointError::corrupt(oid.to_hex(), "tree entry without mode"))?;
            let mode = FileMode::parse(&rest[..space])
                .ok_or_else(|| WaypointError::corrupt(oid.to_hex(), "unknown tree entry mode"))?;
            rest = &rest[space + 1..];

            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| WaypointError::corrupt(oid.to_hex(), "tree entry without name"))?;
            let name = String::from_utf8(rest[..nul].to_vec())
                .map_err(|_| WaypointError::corrupt(oid.to_hex(), "tree entry name is not UTF-8"))?;
            rest = &rest[nul + 1..];

            if rest.len() < OID_LEN {
                return Err(WaypointError::corrupt(oid.to_hex(), "truncated tree entry"));
            }
            let entry_oid = Oid::from_slice(&rest[..OID_LEN])?;
            rest = &rest[OID_LEN..];

            entries.push(TreeEntry { mode, name, oid: entry_oid });
        }
        Ok(Tree { entries })
    }

    /// Identifier of this tree once encoded
    pub fn oid(&self) -> Oid {
        hash_object(ObjectKind::Tree, &self.encode())
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Author or committer identity with a timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
    /// Moment of signing
    pub timestamp: DateTime<Utc>,
    /// Timezone offset recorded in the object, in minutes east of UTC
    pub tz_offset_minutes: i32,
}

impl Signature {
    /// Signature stamped with the current UTC time
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Signature {
            name: name.into(),
            email: email.into(),
            // objects only carry whole seconds
            timestamp: Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now),
            tz_offset_minutes: 0,
        }
    }

    fn encode(&self) -> String {
        let sign = if self.tz_offset_minutes < 0 { '-' } else { '+' };
        let offset = self.tz_offset_minutes.abs();
        format!(
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.timestamp.timestamp(),
            sign,
            offset / 60,
            offset % 60
        )
    }

    fn decode(oid: &Oid, line: &str) -> Result<Self> {
        let bad = || WaypointError::corrupt(oid.to_hex(), format!("malformed signature {:?}", line));

        let open = line.find('<').ok_or_else(bad)?;
        let close = line.rfind('>').ok_or_else(bad)?;
        if close < open {
            return Err(bad());
        }
        let name = line[..open].trim_end().to_string();
        let email = line[open + 1..close].to_string();

        let mut tail = line[close + 1..].split_whitespace();
        let seconds: i64 = tail.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let tz = tail.next().unwrap_or("+0000");
        let tz_offset_minutes = parse_tz(tz).ok_or_else(bad)?;
        let timestamp = Utc.timestamp_opt(seconds, 0).single().ok_or_else(bad)?;

        Ok(Signature { name, email, timestamp, tz_offset_minutes })
    }
}

fn parse_tz(tz: &str) -> Option<i32> {
    if tz.len() != 5 {
        return None;
    }
    let sign = match &tz[..1] {
        "+" => 1,
        "-" => -1,
        _ => return None,
    };
    let hours: i32 = tz[1..3].parse().ok()?;
    let minutes: i32 = tz[3..5].parse().ok()?;
    Some(sign * (hours * 60 + minutes))
}

/// A commit object
///
/// History in Waypoint is linear, so `parents` holds at most one entry for
/// commits created by the engine. Commits written by other tools decode
/// fine with more parents; only the first one is followed by the log walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Identifier of this commit
    pub oid: Oid,
    /// Root tree of the snapshot
    pub tree: Oid,
    /// Parent commits, oldest-first chain pointer
    pub parents: Vec<Oid>,
    /// Author identity
    pub author: Signature,
    /// Committer identity
    pub committer: Signature,
    /// Commit message, without the trailing newline added on encode
    pub message: String,
}

impl Commit {
    /// Build a commit and compute its identifier
    pub fn new(
        tree: Oid,
        parent: Option<Oid>,
        author: Signature,
        committer: Signature,
        message: impl Into<String>,
    ) -> Self {
        let mut commit = Commit {
            // replaced below once the payload is known
            oid: Oid([0; OID_LEN]),
            tree,
            parents: parent.into_iter().collect(),
            author,
            committer,
            message: message.into(),
        };
        commit.oid = hash_object(ObjectKind::Commit, &commit.encode());
        commit
    }

    /// Encode the commit payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("tree {}\n", self.tree));
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent));
        }
        out.push_str(&format!("author {}\n", self.author.encode()));
        out.push_str(&format!("committer {}\n", self.committer.encode()));
        out.push('\n');
        out.push_str(&self.message);
        if !self.message.ends_with('\n') {
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Decode a commit payload
    pub fn decode(oid: Oid, payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| WaypointError::corrupt(oid.to_hex(), "commit is not UTF-8"))?;
        let (headers, message) = match text.find("\n\n") {
            Some(idx) => (&text[..idx], &text[idx + 2..]),
            None => (text.trim_end_matches('\n'), ""),
        };

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            // continuation lines of multi-line headers (gpgsig, mergetag)
            if line.starts_with(' ') {
                continue;
            }
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "tree" => tree = Some(value.parse()?),
                "parent" => parents.push(value.parse()?),
                "author" => author = Some(Signature::decode(&oid, value)?),
                "committer" => committer = Some(Signature::decode(&oid, value)?),
                _ => {}
            }
        }

        let missing = |field: &str| WaypointError::corrupt(oid.to_hex(), format!("commit without {}", field));
        let author = author.ok_or_else(|| missing("author"))?;
        Ok(Commit {
            oid,
            tree: tree.ok_or_else(|| missing("tree"))?,
            parents,
            committer: committer.unwrap_or_else(|| author.clone()),
            author,
            message: message.strip_suffix('\n').unwrap_or(message).to_string(),
        })
    }

    /// First parent, if any
    pub fn parent(&self) -> Option<Oid> {
        self.parents.first().copied()
    }

    /// First line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}
