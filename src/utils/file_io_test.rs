use std::io::Write;

use crate::file_io::create_parent_dir_if_not_exist;
use crate::file_io::open_file_for_append;
use crate::file_io::write_atomically;
use crate::test_utils::enable_logger;
use crate::Error;
use crate::StorageError;

/// Passed: "/tmp/files/data.txt"
/// Expected: "/tmp/files" created
#[test]
fn test_create_parent_dir_for_file() {
    enable_logger();
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("files").join("data.txt");

    create_parent_dir_if_not_exist(&file_path).unwrap();

    let parent_dir = file_path.parent().unwrap();
    assert!(parent_dir.is_dir());
    // File itself should NOT be created
    assert!(!file_path.exists());
}

#[test]
fn test_create_parent_dir_accepts_bare_file_name() {
    create_parent_dir_if_not_exist(std::path::Path::new("topology.data")).unwrap();
}

#[test]
fn test_open_file_for_append_keeps_existing_content() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("logs").join("app.log");

    writeln!(open_file_for_append(&path).unwrap(), "first").unwrap();
    writeln!(open_file_for_append(&path).unwrap(), "second").unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
}

#[test]
fn test_write_atomically_creates_and_replaces() {
    enable_logger();
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("out").join("rack_topology.data");

    write_atomically(&path, b"10.0.0.1 rack1\n").unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"10.0.0.1 rack1\n");

    write_atomically(&path, b"10.0.0.2 rack2\n").unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"10.0.0.2 rack2\n");

    // No temp files left behind next to the destination
    let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[cfg(unix)]
#[test]
fn test_write_atomically_sets_world_readable_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("rack_topology.data");

    write_atomically(&path, b"").unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644);
}

#[test]
fn test_write_atomically_onto_directory_fails_and_reports_destination() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("occupied");
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep"), b"x").unwrap();

    let result = write_atomically(&path, b"data");

    match result {
        Err(Error::Storage(StorageError::Persist { path: reported, .. })) => assert_eq!(reported, path),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(path.join("keep").exists());
}
