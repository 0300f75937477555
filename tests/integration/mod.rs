//! End-to-end checkpoint scenarios
//!
//! Drives the public API the way an agent host does: initialize, save after
//! every edit, inspect history and rewind.

use ::waypoint::*;
use filetime::FileTime;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;
use tracing_test::traced_test;

/// Test harness around one initialized project
pub struct WaypointTestHarness {
    pub temp_dir: TempDir,
    pub waypoint: Waypoint,
}

impl WaypointTestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let (waypoint, _) = Waypoint::initialize(temp_dir.path()).unwrap();
        Self { temp_dir, waypoint }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.root().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    pub fn read(&self, path: &str) -> String {
        fs::read_to_string(self.root().join(path)).unwrap()
    }

    pub fn save(&self) -> Oid {
        self.waypoint.save(None).unwrap().oid.expect("expected a new checkpoint")
    }
}

impl Default for WaypointTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
#[traced_test]
fn test_agent_edit_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let (waypoint, init) = Waypoint::initialize(temp_dir.path()).unwrap();
    assert_eq!(init.status, InitStatus::Success);
    assert!(init.ignore_file_updated);

    fs::write(temp_dir.path().join("a.txt"), "1").unwrap();
    let first = waypoint.save(None).unwrap();
    assert_eq!(first.status, SaveStatus::Success);
    assert_eq!(first.files_processed, 2);
    assert_eq!(first.files, vec![".gitignore".to_string(), "a.txt".to_string()]);
    let first_oid = first.oid.unwrap();

    fs::write(temp_dir.path().join("a.txt"), "2").unwrap();
    let second = waypoint.save(None).unwrap();
    assert_eq!(second.files, vec!["a.txt".to_string()]);
    info!("second checkpoint {:?}", second.oid);

    let outcome = waypoint.restore(&first_oid.to_hex(), RestoreMode::Soft).unwrap();
    let result = outcome.restored().unwrap();
    assert_eq!(result.target_oid, first_oid);
    assert_eq!(result.previous_head_oid, second.oid);
    assert_eq!(result.commits_removed, 1);
    assert!(result.warnings.is_empty());

    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(), "1");
    assert_eq!(waypoint.head_oid().unwrap(), first_oid);
}

#[test]
fn test_save_is_idempotent() {
    let harness = WaypointTestHarness::new();
    harness.write("src/main.rs", "fn main() {}");
    let head = harness.save();

    for _ in 0..3 {
        let result = harness.waypoint.save(None).unwrap();
        assert_eq!(result, SaveResult::no_changes());
    }
    assert_eq!(harness.waypoint.head_oid().unwrap(), head);
    assert_eq!(harness.waypoint.log(None, None).unwrap().total_count, 1);
}

#[test]
fn test_history_is_linear_and_newest_first() {
    let harness = WaypointTestHarness::new();
    let mut oids = Vec::new();
    for i in 0..5 {
        harness.write("counter.txt", &i.to_string());
        let oid = harness.waypoint.save(Some(&format!("step {}", i))).unwrap().oid.unwrap();
        oids.push(oid);
    }

    let log = harness.waypoint.log(None, None).unwrap();
    assert_eq!(log.total_count, 5);
    for (commit, expected) in log.commits.iter().zip(oids.iter().rev()) {
        assert_eq!(commit.oid, *expected);
    }
    for pair in log.commits.windows(2) {
        assert_eq!(pair[0].parent(), Some(pair[1].oid));
        assert!(pair[0].committer.timestamp >= pair[1].committer.timestamp);
    }
    assert!(log.commits.last().unwrap().parents.is_empty());
    assert_eq!(log.commits[0].message, "step 4");

    let limited = harness.waypoint.log(Some(2), None).unwrap();
    assert_eq!(limited.total_count, 2);
}

#[test]
fn test_default_message_format() {
    let harness = WaypointTestHarness::new();
    harness.write("a.txt", "a");
    let oid = harness.save();

    let message = harness.waypoint.commit(&oid).unwrap().message;
    let timestamp = message.strip_prefix("Checkpoint: ").unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok(), "bad timestamp {}", timestamp);
    assert!(timestamp.ends_with('Z'));
}

#[test]
fn test_restore_rewinds_several_commits_and_saves_continue() {
    let harness = WaypointTestHarness::new();
    harness.write("file.txt", "v0");
    let base = harness.save();
    for i in 1..=3 {
        harness.write("file.txt", &format!("v{}", i));
        harness.save();
    }

    let outcome = harness.waypoint.restore(&base.to_hex()[..8], RestoreMode::Soft).unwrap();
    assert_eq!(outcome.restored().unwrap().commits_removed, 3);
    assert_eq!(harness.read("file.txt"), "v0");

    // restoring leaves nothing to save
    assert!(!harness.waypoint.has_changes().unwrap().has_changes);

    harness.write("file.txt", "branch");
    let next = harness.save();
    assert_eq!(harness.waypoint.commit(&next).unwrap().parent(), Some(base));
    assert_eq!(harness.waypoint.log(None, None).unwrap().total_count, 2);
}

#[test]
fn test_soft_and_hard_restore() {
    let harness = WaypointTestHarness::new();
    harness.write("keep.txt", "keep");
    let target = harness.save();

    harness.write("extra/new.txt", "new");
    harness.write("keep.txt", "changed");
    harness.save();
    harness.write("untracked-later.txt", "x");

    harness.waypoint.restore(&target.to_hex(), RestoreMode::Soft).unwrap();
    assert_eq!(harness.read("keep.txt"), "keep");
    assert!(harness.root().join("extra/new.txt").exists());

    let outcome = harness.waypoint.restore(&target.to_hex(), RestoreMode::Hard).unwrap();
    let result = outcome.restored().unwrap();
    assert_eq!(result.files_deleted, 2);
    assert!(!harness.root().join("extra").exists());
    assert!(!harness.root().join("untracked-later.txt").exists());
    assert!(harness.root().join(".waypoint/HEAD").exists());
}

#[test]
fn test_hard_restore_keeps_ignored_files() {
    let harness = WaypointTestHarness::new();
    harness.write(".gitignore", "/.waypoint/\n*.log\ntarget/\n");
    harness.write("src/lib.rs", "lib");
    let target = harness.save();

    harness.write("debug.log", "log line");
    harness.write("target/debug/app", "binary");
    harness.write("src/extra.rs", "extra");

    let outcome = harness.waypoint.restore(&target.to_hex(), RestoreMode::Hard).unwrap();
    assert_eq!(outcome.restored().unwrap().files_deleted, 1);
    assert!(harness.root().join("debug.log").exists());
    assert!(harness.root().join("target/debug/app").exists());
    assert!(!harness.root().join("src/extra.rs").exists());
}

#[test]
fn test_ignored_and_store_paths_never_recorded() {
    let harness = WaypointTestHarness::new();
    harness.write(".gitignore", "/.waypoint/\nnode_modules/\n*.tmp\n");
    harness.write("node_modules/pkg/index.js", "module");
    harness.write("scratch.tmp", "tmp");
    harness.write("src/app.js", "app");
    let oid = harness.save();

    let log = harness.waypoint.log(None, None).unwrap();
    assert_eq!(log.commits[0].oid, oid);
    for path in ["node_modules/pkg/index.js", "scratch.tmp", ".waypoint/HEAD"] {
        assert!(matches!(
            harness.waypoint.read_file_at(&oid, path).unwrap_err(),
            WaypointError::PathNotFound { .. }
        ));
    }
    assert_eq!(harness.waypoint.read_file_at(&oid, "src/app.js").unwrap(), b"app");

    // edits to ignored files are not changes
    harness.write("scratch.tmp", "still ignored");
    assert!(!harness.waypoint.has_changes().unwrap().has_changes);
}

#[test]
fn test_newly_ignored_file_leaves_next_checkpoint() {
    let harness = WaypointTestHarness::new();
    harness.write("secret.env", "TOKEN=1");
    let first = harness.save();

    harness.write(".gitignore", "/.waypoint/\nsecret.env\n");
    let second = harness.waypoint.save(None).unwrap();
    assert!(second.files.contains(&"secret.env".to_string()));

    let oid = second.oid.unwrap();
    assert!(harness.waypoint.read_file_at(&oid, "secret.env").is_err());
    assert_eq!(harness.waypoint.read_file_at(&first, "secret.env").unwrap(), b"TOKEN=1");
}

#[test]
fn test_deletion_alone_creates_checkpoint() {
    let harness = WaypointTestHarness::new();
    harness.write("a.txt", "a");
    harness.write("b.txt", "b");
    harness.save();

    fs::remove_file(harness.root().join("b.txt")).unwrap();
    let summary = harness.waypoint.has_changes().unwrap();
    assert_eq!(summary.changed_files, vec!["b.txt".to_string()]);

    let result = harness.waypoint.save(None).unwrap();
    assert_eq!(result.files, vec!["b.txt".to_string()]);
    assert!(harness.waypoint.read_file_at(&result.oid.unwrap(), "b.txt").is_err());
}

#[test]
fn test_touch_without_edit_is_not_a_change() {
    let harness = WaypointTestHarness::new();
    harness.write("a.txt", "stable");
    harness.save();

    let path = harness.root().join("a.txt");
    filetime::set_file_mtime(&path, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
    assert!(!harness.waypoint.has_changes().unwrap().has_changes);
    assert_eq!(harness.waypoint.save(None).unwrap().status, SaveStatus::NoChanges);
}

#[test]
fn test_same_size_edit_is_detected() {
    let harness = WaypointTestHarness::new();
    harness.write("a.txt", "abc");
    harness.save();

    let path = harness.root().join("a.txt");
    let original = FileTime::from_last_modification_time(&fs::metadata(&path).unwrap());
    fs::write(&path, "xyz").unwrap();
    // force a distinct mtime even on coarse-grained filesystems
    let shifted = FileTime::from_unix_time(original.unix_seconds() + 10, original.nanoseconds());
    filetime::set_file_mtime(&path, shifted).unwrap();

    let result = harness.waypoint.save(None).unwrap();
    assert_eq!(result.files, vec!["a.txt".to_string()]);
}

#[test]
fn test_edit_within_same_timestamp_tick_is_detected() {
    let harness = WaypointTestHarness::new();
    let path = harness.root().join("a.txt");
    // a timestamp the index write cannot be newer than, as on a coarse filesystem
    let tick = FileTime::from_unix_time(FileTime::now().unix_seconds() + 60, 0);

    harness.write("a.txt", "1");
    filetime::set_file_mtime(&path, tick).unwrap();
    harness.save();

    harness.write("a.txt", "2");
    filetime::set_file_mtime(&path, tick).unwrap();
    assert_eq!(harness.waypoint.has_changes().unwrap().changed_files, vec!["a.txt".to_string()]);

    let result = harness.waypoint.save(None).unwrap();
    assert_eq!(result.files, vec!["a.txt".to_string()]);
    assert_eq!(harness.waypoint.read_file_at(&result.oid.unwrap(), "a.txt").unwrap(), b"2");
}

#[test]
fn test_nested_gitignore_files_apply_to_their_directory() {
    let harness = WaypointTestHarness::new();
    harness.write(".gitignore", "/.waypoint/\n*.log\n");
    harness.write("sub/.gitignore", "*.bin\n!keep.bin\n!important.log\n");
    harness.write("sub/big.bin", "ignored");
    harness.write("sub/keep.bin", "kept");
    harness.write("sub/important.log", "kept");
    harness.write("sub/debug.log", "ignored by root");
    harness.write("other/big.bin", "not under sub");

    let result = harness.waypoint.save(None).unwrap();
    assert_eq!(
        result.files,
        vec![".gitignore", "other/big.bin", "sub/.gitignore", "sub/important.log", "sub/keep.bin"]
    );

    harness.write("sub/big.bin", "edited");
    assert!(!harness.waypoint.has_changes().unwrap().has_changes);
}

#[test]
fn test_changes_detected_without_staging_index() {
    let harness = WaypointTestHarness::new();
    harness.write("a.txt", "one");
    harness.write("b.txt", "two");
    let head = harness.save();

    fs::remove_file(harness.root().join(".waypoint/waypoint-index")).unwrap();
    assert!(!harness.waypoint.has_changes().unwrap().has_changes);

    harness.write("b.txt", "TWO");
    let result = harness.waypoint.save(None).unwrap();
    assert_eq!(result.files, vec!["b.txt".to_string()]);
    assert_eq!(harness.waypoint.commit(&result.oid.unwrap()).unwrap().parent(), Some(head));
}

#[test]
fn test_corrupt_staging_index_is_ignored() {
    let harness = WaypointTestHarness::new();
    harness.write("a.txt", "a");
    harness.save();

    fs::write(harness.root().join(".waypoint/waypoint-index"), b"\xff\xfe garbage").unwrap();
    assert!(!harness.waypoint.has_changes().unwrap().has_changes);
    harness.write("a.txt", "b");
    assert_eq!(harness.waypoint.save(None).unwrap().files, vec!["a.txt".to_string()]);
}

#[test]
fn test_reopen_sees_same_history() {
    let harness = WaypointTestHarness::new();
    harness.write("a.txt", "a");
    let oid = harness.save();

    let reopened = Waypoint::open(harness.root()).unwrap();
    assert_eq!(reopened.head_oid().unwrap(), oid);
    assert_eq!(reopened.resolve("HEAD").unwrap(), oid);
    assert_eq!(reopened.resolve(&oid.to_hex()[..6]).unwrap(), oid);
}

#[test]
fn test_existing_gitignore_is_extended_once() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join(".gitignore"), "target/").unwrap();

    let (_, first) = Waypoint::initialize(temp_dir.path()).unwrap();
    assert!(first.ignore_file_updated);
    let content = fs::read_to_string(temp_dir.path().join(".gitignore")).unwrap();
    assert_eq!(content, "target/\n/.waypoint/\n");

    let (_, second) = Waypoint::initialize(temp_dir.path()).unwrap();
    assert_eq!(second.status, InitStatus::Skipped);
    assert_eq!(fs::read_to_string(temp_dir.path().join(".gitignore")).unwrap(), content);
}

#[test]
fn test_shared_handle_across_threads() {
    let harness = WaypointTestHarness::new();
    harness.write("a.txt", "a");
    let oid = harness.save();
    let waypoint = Arc::new(Waypoint::open(harness.root()).unwrap());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let waypoint = Arc::clone(&waypoint);
            std::thread::spawn(move || {
                assert_eq!(waypoint.head_oid().unwrap(), oid);
                assert_eq!(waypoint.read_file_at(&oid, "a.txt").unwrap(), b"a");
                waypoint.log(None, None).unwrap().total_count
            })
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), 1);
    }
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().map(|o| o.status.success()).unwrap_or(false)
}

fn git(store: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("--git-dir")
        .arg(store)
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_store_is_readable_by_git() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }

    let harness = WaypointTestHarness::new();
    harness.write("hello.txt", "hello\n");
    harness.write("src/nested/mod.rs", "pub mod x;\n");
    harness.save();
    harness.write("hello.txt", "hello again\n");
    let head = harness.save();

    let store = harness.waypoint.store_path();
    assert_eq!(git(store, &["rev-parse", "HEAD"]).trim(), head.to_hex());
    assert_eq!(git(store, &["rev-list", "--count", "HEAD"]).trim(), "2");
    assert_eq!(git(store, &["cat-file", "-p", "HEAD:hello.txt"]), "hello again\n");
    assert_eq!(git(store, &["cat-file", "-p", "HEAD~1:hello.txt"]), "hello\n");
    assert_eq!(git(store, &["cat-file", "-p", "HEAD:src/nested/mod.rs"]), "pub mod x;\n");
    assert_eq!(
        git(store, &["rev-parse", "HEAD~1:hello.txt"]).trim(),
        "ce013625030ba8dba906f756967f9e9ca394464a"
    );
    git(store, &["fsck", "--no-dangling"]);
}
