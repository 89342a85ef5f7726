#[path = "../src/backup.rs"]
mod backup;

use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use zip::write::FileOptions;

fn fake_database() -> Vec<u8> {
    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend_from_slice(b"ledger-test-payload");
    bytes
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = tempfile::tempdir().expect("source workspace");
    let workspace2 = tempfile::tempdir().expect("target workspace");
    let out_dir = tempfile::tempdir().expect("output dir");

    let bytes = fake_database();
    std::fs::write(workspace.path().join("ledger.sqlite3"), &bytes).expect("write source db");
    let snapshot = json!({
        "users": { "u1": { "id": "u1", "name": "Aziza", "rating": 120 } },
        "groups": {},
        "lockedAttendanceDates": ["2026-10-01"],
    });

    let bundle_path = out_dir.path().join("nested").join("workspace.ledger.zip");
    let export = backup::export_workspace_bundle(workspace.path(), &snapshot, &bundle_path)
        .expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.snapshot_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], backup::BUNDLE_FORMAT);
    assert_eq!(manifest["snapshotSha256"], export.snapshot_sha256.as_str());
    archive
        .by_name("db/ledger.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, workspace2.path()).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);
    assert_eq!(import.collections, 3);

    let restored = std::fs::read(workspace2.path().join("ledger.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    assert!(!workspace2.path().join("ledger.sqlite3.importing").exists());
}

#[test]
fn export_requires_a_database() {
    let workspace = tempfile::tempdir().expect("workspace");
    let out = workspace.path().join("bundle.zip");
    let err = backup::export_workspace_bundle(workspace.path(), &json!({}), &out)
        .expect_err("export without database");
    assert!(format!("{err:#}").contains("workspace database not found"));
}

#[test]
fn tampered_snapshot_is_rejected_and_database_left_alone() {
    let out_dir = tempfile::tempdir().expect("output dir");
    let workspace = tempfile::tempdir().expect("target workspace");
    std::fs::write(workspace.path().join("ledger.sqlite3"), b"current").expect("write current db");

    let bundle_path = out_dir.path().join("tampered.zip");
    {
        let file = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(file);
        let opts = FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(
            json!({ "format": backup::BUNDLE_FORMAT, "version": 1, "snapshotSha256": "00" })
                .to_string()
                .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/ledger.sqlite3", opts).expect("db entry");
        zip.write_all(&fake_database()).expect("write db");
        zip.start_file("data/snapshot.json", opts).expect("snapshot entry");
        zip.write_all(b"{\"users\":{}}").expect("write snapshot");
        zip.finish().expect("finish zip");
    }

    let err = backup::import_workspace_bundle(&bundle_path, workspace.path())
        .expect_err("tampered bundle");
    assert!(format!("{err:#}").contains("snapshot checksum mismatch"));
    let current = std::fs::read(workspace.path().join("ledger.sqlite3")).expect("read current db");
    assert_eq!(current, b"current");
}

#[test]
fn foreign_files_are_not_imported() {
    let out_dir = tempfile::tempdir().expect("output dir");
    let workspace = tempfile::tempdir().expect("target workspace");
    let junk = out_dir.path().join("notes.txt");
    std::fs::write(&junk, b"just some text").expect("write junk");

    let err = backup::import_workspace_bundle(&junk, workspace.path()).expect_err("junk import");
    assert!(format!("{err:#}").contains("is not a ledger bundle"));
    assert!(!workspace.path().join("ledger.sqlite3").exists());
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = tempfile::tempdir().expect("output dir");
    let workspace = tempfile::tempdir().expect("target workspace");

    let raw_file = out_dir.path().join("copy.sqlite3");
    let bytes = fake_database();
    std::fs::write(&raw_file, &bytes).expect("write raw sqlite file");

    let import = backup::import_workspace_bundle(&raw_file, workspace.path()).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, backup::RAW_SQLITE_FORMAT);
    assert_eq!(import.collections, 0);

    let restored = std::fs::read(workspace.path().join("ledger.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);
}
