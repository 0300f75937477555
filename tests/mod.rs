//! Main test module for Waypoint
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end checkpoint scenarios
//! - Property-based tests for invariants
//! - Edge cases below

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::waypoint::*;
    use std::fs;
    use tempfile::TempDir;

    fn init() -> (Waypoint, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let (waypoint, _) = Waypoint::initialize(temp_dir.path()).unwrap();
        (waypoint, temp_dir)
    }

    #[test]
    fn test_empty_directory() {
        let (waypoint, temp_dir) = init();

        // only the .gitignore written by initialize
        let first = waypoint.save(Some("Empty")).unwrap();
        assert_eq!(first.files, vec![".gitignore".to_string()]);

        fs::write(temp_dir.path().join("file.txt"), "content").unwrap();
        waypoint.save(None).unwrap();

        let outcome = waypoint.restore(&first.oid.unwrap().to_hex(), RestoreMode::Hard).unwrap();
        assert_eq!(outcome.restored().unwrap().files_deleted, 1);
        assert!(!temp_dir.path().join("file.txt").exists());
    }

    #[test]
    fn test_special_filenames() {
        let (waypoint, temp_dir) = init();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "UPPERCASE.TXT",
            "数据.txt",
            "émoji-🚀.md",
        ];
        for name in &special_names {
            fs::write(temp_dir.path().join(name), format!("Content of {}", name)).unwrap();
        }

        let saved = waypoint.save(None).unwrap();
        let oid = saved.oid.unwrap();
        for name in &special_names {
            assert!(saved.files.contains(&name.to_string()), "{} missing", name);
            fs::remove_file(temp_dir.path().join(name)).unwrap();
        }

        waypoint.restore(&oid.to_hex(), RestoreMode::Soft).unwrap();
        for name in &special_names {
            let content = fs::read_to_string(temp_dir.path().join(name)).unwrap();
            assert_eq!(content, format!("Content of {}", name));
        }
    }

    #[test]
    fn test_binary_content_round_trips() {
        let (waypoint, temp_dir) = init();
        let binary: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        fs::write(temp_dir.path().join("blob.bin"), &binary).unwrap();

        let oid = waypoint.save(None).unwrap().oid.unwrap();
        fs::write(temp_dir.path().join("blob.bin"), b"overwritten").unwrap();
        waypoint.save(None).unwrap();

        assert_eq!(waypoint.read_file_at(&oid, "blob.bin").unwrap(), binary);
        waypoint.restore(&oid.to_hex(), RestoreMode::Soft).unwrap();
        assert_eq!(fs::read(temp_dir.path().join("blob.bin")).unwrap(), binary);
    }

    #[test]
    fn test_empty_file_and_nested_directories() {
        let (waypoint, temp_dir) = init();
        let deep = temp_dir.path().join("a/b/c/d/e");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("empty.txt"), b"").unwrap();

        let oid = waypoint.save(None).unwrap().oid.unwrap();
        assert_eq!(waypoint.read_file_at(&oid, "a/b/c/d/e/empty.txt").unwrap(), Vec::<u8>::new());

        fs::remove_dir_all(temp_dir.path().join("a")).unwrap();
        waypoint.restore(&oid.to_hex(), RestoreMode::Soft).unwrap();
        assert!(deep.join("empty.txt").is_file());
    }

    #[test]
    fn test_empty_directories_are_not_tracked() {
        let (waypoint, temp_dir) = init();
        waypoint.save(None).unwrap();

        fs::create_dir_all(temp_dir.path().join("empty/nested")).unwrap();
        let summary = waypoint.has_changes().unwrap();
        assert!(!summary.has_changes);
        assert_eq!(waypoint.save(None).unwrap().status, SaveStatus::NoChanges);
    }

    #[test]
    fn test_unknown_restore_target() {
        let (waypoint, temp_dir) = init();
        fs::write(temp_dir.path().join("keep.txt"), "keep").unwrap();
        let head = waypoint.save(None).unwrap().oid.unwrap();

        for target in ["deadbeefdeadbeef", "not-hex", "0000000000000000000000000000000000000000"] {
            let outcome = waypoint.restore(target, RestoreMode::Hard).unwrap();
            assert_eq!(outcome, RestoreOutcome::CommitNotFound(target.to_string()));
        }
        assert_eq!(waypoint.head_oid().unwrap(), head);
        assert_eq!(fs::read_to_string(temp_dir.path().join("keep.txt")).unwrap(), "keep");
    }

    #[test]
    fn test_restore_before_any_checkpoint() {
        let (waypoint, _temp_dir) = init();
        let outcome = waypoint.restore("HEAD", RestoreMode::Soft).unwrap();
        assert!(matches!(outcome, RestoreOutcome::CommitNotFound(_)));
    }

    #[test]
    fn test_log_and_head_before_first_save() {
        let (waypoint, _temp_dir) = init();
        assert!(matches!(waypoint.head_oid().unwrap_err(), WaypointError::NoHead));
        let log = waypoint.log(None, None).unwrap();
        assert_eq!(log.total_count, 0);
    }

    #[test]
    fn test_nested_git_directory_is_never_recorded() {
        let (waypoint, temp_dir) = init();
        fs::create_dir_all(temp_dir.path().join(".git/objects")).unwrap();
        fs::write(temp_dir.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::create_dir_all(temp_dir.path().join("vendor/lib/.git")).unwrap();
        fs::write(temp_dir.path().join("vendor/lib/.git/config"), "[core]").unwrap();
        fs::write(temp_dir.path().join("vendor/lib/mod.rs"), "// lib").unwrap();

        let saved = waypoint.save(None).unwrap();
        assert_eq!(
            saved.files,
            vec![".gitignore".to_string(), "vendor/lib/mod.rs".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_and_symlink_round_trip() {
        use std::os::unix::fs::PermissionsExt;

        let (waypoint, temp_dir) = init();
        let script = temp_dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("run.sh", temp_dir.path().join("link")).unwrap();

        let oid = waypoint.save(None).unwrap().oid.unwrap();
        fs::remove_file(&script).unwrap();
        fs::remove_file(temp_dir.path().join("link")).unwrap();
        waypoint.save(None).unwrap();

        waypoint.restore(&oid.to_hex(), RestoreMode::Soft).unwrap();
        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
        assert_eq!(
            fs::read_link(temp_dir.path().join("link")).unwrap(),
            std::path::PathBuf::from("run.sh")
        );
    }
}
