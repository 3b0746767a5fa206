//! Catalog loading, the startup integrity sweep, and deletion.

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use stashcam_lib::store::metadata::{GeoPoint, MetadataTable, SegmentMetadata, METADATA_FILE_NAME};
use stashcam_lib::store::{MediaAttributes, PendingSegment};

fn seed_table(dir: &std::path::Path, rows: &[(&str, SegmentMetadata)]) {
    let mut table = MetadataTable::load(&dir.join(METADATA_FILE_NAME));
    for (name, row) in rows {
        table.upsert(name, row.clone()).unwrap();
    }
}

fn reload_table(dir: &std::path::Path) -> MetadataTable {
    MetadataTable::load(&dir.join(METADATA_FILE_NAME))
}

// ============================================================================
// Sweep
// ============================================================================

#[tokio::test]
async fn test_sweep_lists_only_playable_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("recordings");
    std::fs::create_dir_all(&root).unwrap();

    write_playable(&root.join("rec_20250101-100000_aaaa0000_0001.mp4"), 4096);
    write_playable(&root.join("rec_20250101-100000_aaaa0000_0002.mp4"), 500);
    write_garbage(&root.join("rec_20250101-100000_aaaa0000_0003.mp4"), 4096);
    std::fs::write(root.join("notes.txt"), "not media").unwrap();

    let store = new_store(&root);
    let report = store.load_catalog().await.unwrap();

    assert_eq!(report.kept, 1);
    assert_eq!(report.rejected.len(), 2);
    assert!(store.is_loaded());

    let entries = store.list_all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "rec_20250101-100000_aaaa0000_0001.mp4");
    assert_eq!(entries[0].sequence, Some(1));
    assert_eq!(entries[0].duration_secs, 1.5);

    assert!(!root.join("rec_20250101-100000_aaaa0000_0002.mp4").exists());
    assert!(!root.join("rec_20250101-100000_aaaa0000_0003.mp4").exists());
    assert!(root.join("notes.txt").exists());
}

#[tokio::test]
async fn test_sweep_promotes_playable_staging_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("recordings");
    let store = new_store(&root);

    let staged = store.staging_path("rec_20250101-100000_bbbb0000_0004.mp4");
    write_playable(&staged, 8192);
    let broken = store.staging_path("rec_20250101-100000_bbbb0000_0005.mp4");
    write_garbage(&broken, 8192);

    let report = store.load_catalog().await.unwrap();

    assert_eq!(report.promoted, 1);
    assert_eq!(report.rejected.len(), 1);
    assert!(!staged.exists());
    assert!(!broken.exists());
    assert!(root.join("rec_20250101-100000_bbbb0000_0004.mp4").exists());
    assert!(store.get("rec_20250101-100000_bbbb0000_0004.mp4").is_some());
}

#[tokio::test]
async fn test_sweep_prunes_orphan_rows_and_keeps_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("recordings");
    std::fs::create_dir_all(&root).unwrap();

    let created = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
    write_playable(&root.join("rec_kept_0001.mp4"), 4096);
    seed_table(
        &root,
        &[
            (
                "rec_kept_0001.mp4",
                SegmentMetadata {
                    location: Some(GeoPoint::new(48.85, 2.35)),
                    address: Some("Paris".to_string()),
                    created_at: Some(created),
                    ..Default::default()
                },
            ),
            ("rec_gone_0002.mp4", SegmentMetadata::default()),
        ],
    );

    let store = new_store(&root);
    let report = store.load_catalog().await.unwrap();

    assert_eq!(report.pruned_metadata, 1);
    let entry = store.get("rec_kept_0001.mp4").unwrap();
    assert_eq!(entry.created_at, Some(created));
    assert_eq!(entry.address.as_deref(), Some("Paris"));

    let table = reload_table(&root);
    assert!(table.contains("rec_kept_0001.mp4"));
    assert!(!table.contains("rec_gone_0002.mp4"));
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("recordings");
    std::fs::create_dir_all(&root).unwrap();

    let older = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
    let newer = Utc.with_ymd_and_hms(2025, 1, 2, 8, 0, 0).unwrap();
    write_playable(&root.join("rec_a_0001.mp4"), 4096);
    write_playable(&root.join("rec_b_0001.mp4"), 4096);
    seed_table(
        &root,
        &[
            (
                "rec_a_0001.mp4",
                SegmentMetadata {
                    created_at: Some(older),
                    ..Default::default()
                },
            ),
            (
                "rec_b_0001.mp4",
                SegmentMetadata {
                    created_at: Some(newer),
                    ..Default::default()
                },
            ),
        ],
    );

    let store = new_store(&root);
    store.load_catalog().await.unwrap();

    let names: Vec<_> = store.list_all().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["rec_b_0001.mp4", "rec_a_0001.mp4"]);
}

#[tokio::test]
async fn test_reload_keeps_committed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("recordings");
    let store = new_store(&root);

    let staged = store.staging_path("rec_c_0001.mp4");
    write_playable(&staged, 4096);
    store
        .commit(
            &PendingSegment {
                source_path: staged,
                file_name: "rec_c_0001.mp4".to_string(),
                sequence: 1,
            },
            MediaAttributes {
                duration_secs: 42.0,
                ..Default::default()
            },
        )
        .unwrap();

    let report = store.load_catalog().await.unwrap();
    assert_eq!(report.kept, 1);
    assert!(report.rejected.is_empty());
    assert_eq!(store.get("rec_c_0001.mp4").unwrap().duration_secs, 42.0);
}

#[tokio::test]
async fn test_sweep_skips_reserved_staging_target() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("recordings");
    let store = new_store(&root);

    let live = store.reserve_staging("rec_e_0001.mp4").unwrap();
    write_playable(&live, 4096);

    let report = store.load_catalog().await.unwrap();
    assert_eq!(report.promoted, 0);
    assert!(report.rejected.is_empty());
    assert!(live.exists());
    assert!(store.is_in_flight("rec_e_0001.mp4"));

    store
        .commit(
            &PendingSegment {
                source_path: live,
                file_name: "rec_e_0001.mp4".to_string(),
                sequence: 1,
            },
            MediaAttributes::default(),
        )
        .unwrap();
    assert!(!store.is_in_flight("rec_e_0001.mp4"));
    assert!(store.get("rec_e_0001.mp4").is_some());
}

#[tokio::test]
async fn test_load_catalog_while_recording_leaves_live_segment_alone() {
    let h = spawn_controller(FakeConfig::default());
    h.handle.start(session(120)).await.unwrap();

    let report = h.handle.load_catalog().await.unwrap();
    assert_eq!(report.promoted, 0);
    assert!(report.rejected.is_empty());
    assert!(h.handle.catalog().is_empty());
    assert_eq!(h.staging_files(), 1);

    let summary = h.handle.stop().await.unwrap().unwrap();
    assert_eq!(summary.committed.len(), 1);
    assert_eq!(summary.discarded, 0);
    assert_eq!(h.handle.catalog().len(), 1);
}

#[tokio::test]
async fn test_load_catalog_while_recording_keeps_small_live_segment() {
    let h = spawn_controller(FakeConfig {
        payload_bytes: 512,
        ..Default::default()
    });
    h.handle.start(session(120)).await.unwrap();

    let report = h.handle.load_catalog().await.unwrap();
    assert!(report.rejected.is_empty());
    assert_eq!(h.staging_files(), 1);
}

#[tokio::test]
async fn test_sweep_after_session_promotes_nothing_new() {
    let h = spawn_controller(FakeConfig::default());
    h.handle.start(session(120)).await.unwrap();
    h.handle.stop().await.unwrap();

    let report = h.handle.load_catalog().await.unwrap();

    assert_eq!(report.kept, 1);
    assert_eq!(report.promoted, 0);
    assert!(!h.store.is_in_flight(&h.handle.catalog()[0].name));
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_delete_removes_file_and_row() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("recordings");
    std::fs::create_dir_all(&root).unwrap();

    write_playable(&root.join("rec_d_0001.mp4"), 4096);
    write_playable(&root.join("rec_d_0002.mp4"), 4096);
    seed_table(
        &root,
        &[
            ("rec_d_0001.mp4", SegmentMetadata::default()),
            ("rec_d_0002.mp4", SegmentMetadata::default()),
        ],
    );

    let store = new_store(&root);
    store.load_catalog().await.unwrap();
    store.delete("rec_d_0001.mp4").unwrap();

    assert!(!root.join("rec_d_0001.mp4").exists());
    assert!(store.get("rec_d_0001.mp4").is_none());
    assert!(!reload_table(&root).contains("rec_d_0001.mp4"));

    let reopened = new_store(&root);
    let report = reopened.load_catalog().await.unwrap();
    assert_eq!(report.kept, 1);
    assert_eq!(report.pruned_metadata, 0);
}

#[tokio::test]
async fn test_delete_of_missing_file_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir.path().join("recordings"));

    assert!(store.delete("rec_never_0001.mp4").is_ok());
}

#[tokio::test]
async fn test_delete_rejects_path_escapes() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir.path().join("recordings"));

    assert!(store.delete("../outside.mp4").is_err());
    assert!(store.delete(METADATA_FILE_NAME).is_err());
}

#[tokio::test]
async fn test_delete_all_through_controller_handle() {
    let h = spawn_controller(FakeConfig::default());
    h.handle.start(session(120)).await.unwrap();
    h.handle.rotate().await.unwrap();
    h.handle.stop().await.unwrap();
    assert_eq!(h.handle.catalog().len(), 2);

    let report = h.handle.delete_all().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.deleted.len(), 2);
    assert!(h.handle.catalog().is_empty());
    assert!(reload_table(&h.recordings_dir()).is_empty());
}

#[tokio::test]
async fn test_delete_through_controller_handle() {
    let h = spawn_controller(FakeConfig::default());
    h.handle.start(session(120)).await.unwrap();
    let summary = h.handle.stop().await.unwrap().unwrap();
    let name = summary.committed[0].name.clone();

    h.handle.delete(&name).await.unwrap();

    assert!(h.handle.catalog().is_empty());
    assert!(!h.recordings_dir().join(&name).exists());
}
