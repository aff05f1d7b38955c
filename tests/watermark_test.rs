// ABOUTME: Integration tests for the durable watermark cursor
// ABOUTME: Covers first-run, round-trip, corruption and atomic-replace behavior

use events_replicator::watermark::WatermarkStore;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_first_run_reads_zero() {
    let dir = tempdir().unwrap();
    let store = WatermarkStore::new(dir.path().join("last_sync_id"));
    assert_eq!(store.get().unwrap(), 0);
    // reading must not create the file
    assert!(!store.path().exists());
}

#[test]
fn test_commit_sequence_is_monotonic() {
    let dir = tempdir().unwrap();
    let store = WatermarkStore::new(dir.path().join("last_sync_id"));

    let mut previous = 0;
    for id in [1050u64, 1550, 1700, 1700] {
        store.set(id).unwrap();
        let read_back = store.get().unwrap();
        assert_eq!(read_back, id);
        assert!(read_back >= previous);
        previous = read_back;
    }
}

#[test]
fn test_corrupt_store_fails_instead_of_defaulting() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("last_sync_id");
    fs::write(&path, "1550 oops").unwrap();

    let store = WatermarkStore::new(&path);
    // a corrupt cursor must never silently read as 0 - that would replay
    // the entire source history
    assert!(store.get().is_err());
}

#[test]
fn test_set_leaves_no_temp_files_behind() {
    let dir = tempdir().unwrap();
    let store = WatermarkStore::new(dir.path().join("last_sync_id"));
    store.set(42).unwrap();
    store.set(43).unwrap();

    let entries: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("last_sync_id")]);
}

#[test]
fn test_file_content_is_a_bare_integer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("last_sync_id");
    let store = WatermarkStore::new(&path);
    store.set(1700).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "1700");
}
