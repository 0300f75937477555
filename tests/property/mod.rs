//! Property-based testing for Waypoint
//!
//! Uses proptest to verify save/restore invariants across randomly
//! generated directory contents.

use ::waypoint::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Generate `/`-separated relative paths, 0-3 directories deep
///
/// Directory names carry a `d_` prefix and file names an extension, so a
/// file never collides with a directory.
fn path_strategy() -> impl Strategy<Value = String> {
    (prop::collection::vec("[a-z]{1,6}", 0..=3), "[a-z]{1,8}\\.(txt|rs|md)").prop_map(|(dirs, file)| {
        let mut parts = dirs.into_iter().map(|d| format!("d_{}", d)).collect::<Vec<_>>();
        parts.push(file);
        parts.join("/")
    })
}

/// Generate file contents, binary included
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 1..12)
}

/// Every trackable file under `root` with its content
fn snapshot_dir(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".waypoint")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap();
            let key = relative.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Replace the working directory contents with `files`
fn write_tree(root: &Path, files: &BTreeMap<String, Vec<u8>>) {
    for entry in fs::read_dir(root).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name();
        if name == ".waypoint" || name == ".gitignore" {
            continue;
        }
        if entry.file_type().unwrap().is_dir() {
            fs::remove_dir_all(entry.path()).unwrap();
        } else {
            fs::remove_file(entry.path()).unwrap();
        }
    }
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Hard restore reproduces a checkpoint exactly, whatever happened since
    #[test]
    fn prop_hard_restore_reproduces_checkpoint(
        first in tree_strategy(),
        second in tree_strategy(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (waypoint, _) = Waypoint::initialize(root).unwrap();

        write_tree(root, &first);
        let expected = snapshot_dir(root);
        let target = waypoint.save(None).unwrap().oid.unwrap();

        write_tree(root, &second);
        waypoint.save(None).unwrap();

        let outcome = waypoint.restore(&target.to_hex(), RestoreMode::Hard).unwrap();
        prop_assert!(outcome.restored().unwrap().warnings.is_empty());
        prop_assert_eq!(snapshot_dir(root), expected);
        prop_assert!(!waypoint.has_changes().unwrap().has_changes);
    }

    /// A save immediately after a save never records anything
    #[test]
    fn prop_second_save_has_no_changes(files in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let (waypoint, _) = Waypoint::initialize(temp_dir.path()).unwrap();
        write_tree(temp_dir.path(), &files);

        let first = waypoint.save(None).unwrap();
        prop_assert_eq!(first.files_processed, files.len() + 1);
        prop_assert_eq!(waypoint.save(None).unwrap().status, SaveStatus::NoChanges);
    }

    /// Every saved file reads back byte for byte
    #[test]
    fn prop_read_file_at_matches_saved_content(files in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let (waypoint, _) = Waypoint::initialize(temp_dir.path()).unwrap();
        write_tree(temp_dir.path(), &files);
        let oid = waypoint.save(None).unwrap().oid.unwrap();

        for (path, content) in &files {
            prop_assert_eq!(&waypoint.read_file_at(&oid, path).unwrap(), content);
        }
    }
}
