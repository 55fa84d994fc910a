//! CLI integration tests
//!
//! Run the `ctrlsnap` binary against temp SQLite databases and check exit
//! codes and JSON output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const L5X: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<RSLogix5000Content SchemaRevision="1.0" SoftwareRevision="33.01" TargetName="Line1" TargetType="Controller" ContainsContext="false">
<Controller Use="Target" Name="Line1" ProcessorType="1756-L83E" MajorRev="33" MinorRev="1">
<Tags>
<Tag Name="A" TagType="Base" DataType="DINT"/>
<Tag Name="B" TagType="Base" DataType="BOOL"/>
</Tags>
</Controller>
</RSLogix5000Content>"#;

fn setup_test_dir() -> (TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let connection = format!("sqlite:{}", temp_dir.path().join("plant.db").display());
    (temp_dir, connection)
}

fn ctrlsnap(dir: &Path, connection: &str, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ctrlsnap"))
        .current_dir(dir)
        .env_remove("CTRLSNAP_CONFIG")
        .env_remove("CTRLSNAP_CONNECTION")
        .env("CTRLSNAP_LOG_PROFILE", "test")
        .args(["--connection", connection])
        .args(args)
        .output()
        .expect("Failed to execute CLI")
}

fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "invalid JSON ({}): {}",
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn test_build_then_status_is_current() {
    // Given: an empty directory
    let (dir, connection) = setup_test_dir();

    // When: build runs and status is queried
    let build = ctrlsnap(dir.path(), &connection, &["build"]);
    let status = ctrlsnap(dir.path(), &connection, &["database", "status", "--json"]);

    // Then: both succeed and the database is current
    assert!(build.status.success(), "{}", String::from_utf8_lossy(&build.stderr));
    assert!(status.status.success());
    assert_eq!(json(&status)["state"], "current");
}

#[test]
fn test_import_reports_snapshot_and_keeps_file() {
    let (dir, connection) = setup_test_dir();
    ctrlsnap(dir.path(), &connection, &["build"]);
    let file = write(dir.path(), "Test.L5X", L5X.as_bytes());

    let output = ctrlsnap(
        dir.path(),
        &connection,
        &["import", file.to_str().unwrap(), "--json", "--meta", "asset_id=42"],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let outcome = json(&output);
    assert_eq!(outcome["outcome"], "imported");
    assert_eq!(outcome["rows"]["tag"], 2);
    assert!(file.exists());
}

#[test]
fn test_import_unchanged_with_skip_flag() {
    let (dir, connection) = setup_test_dir();
    ctrlsnap(dir.path(), &connection, &["build"]);
    let file = write(dir.path(), "Test.L5X", L5X.as_bytes());
    let path = file.to_str().unwrap();

    ctrlsnap(dir.path(), &connection, &["import", path]);
    let output = ctrlsnap(
        dir.path(),
        &connection,
        &["import", path, "--skip-unchanged", "--json"],
    );

    assert!(output.status.success());
    assert_eq!(json(&output)["outcome"], "unchanged");
}

#[test]
fn test_exit_codes_distinguish_failures() {
    let (dir, connection) = setup_test_dir();
    let good = write(dir.path(), "Test.L5X", L5X.as_bytes());
    let bad = write(dir.path(), "bad.ACD", b"\x00\x01binary");
    let missing = dir.path().join("missing.L5X");

    // Unbuilt database: system error
    let unbuilt = ctrlsnap(dir.path(), &connection, &["import", good.to_str().unwrap()]);
    assert_eq!(unbuilt.status.code(), Some(71));

    ctrlsnap(dir.path(), &connection, &["build"]);

    // Unparseable source: format error
    let format = ctrlsnap(dir.path(), &connection, &["import", bad.to_str().unwrap()]);
    assert_eq!(format.status.code(), Some(65));

    // Missing file
    let not_found = ctrlsnap(dir.path(), &connection, &["import", missing.to_str().unwrap()]);
    assert_eq!(not_found.status.code(), Some(66));

    // Unsupported extension: usage error
    let txt = write(dir.path(), "notes.txt", b"hello");
    let usage = ctrlsnap(dir.path(), &connection, &["import", txt.to_str().unwrap()]);
    assert_eq!(usage.status.code(), Some(64));
}

#[test]
fn test_unknown_provider_is_usage_error() {
    let dir = TempDir::new().unwrap();

    let output = ctrlsnap(dir.path(), "postgres:plant", &["build"]);

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn test_unknown_subcommand_is_usage_error() {
    let (dir, connection) = setup_test_dir();

    let output = ctrlsnap(dir.path(), &connection, &["explode"]);

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn test_revert_and_database_migrate() {
    // Given: a built database reverted to its first migration
    let (dir, connection) = setup_test_dir();
    ctrlsnap(dir.path(), &connection, &["build"]);
    let revert = ctrlsnap(dir.path(), &connection, &["database", "revert", "--to", "20240115090000"]);
    assert!(revert.status.success(), "{}", String::from_utf8_lossy(&revert.stderr));

    let status = ctrlsnap(dir.path(), &connection, &["database", "status", "--json"]);
    assert_eq!(json(&status)["state"], "outdated");

    // When: database migrate runs
    let migrate = ctrlsnap(dir.path(), &connection, &["database", "migrate", "--json"]);

    // Then: the two reverted units are re-applied
    assert!(migrate.status.success());
    assert_eq!(json(&migrate)["applied"].as_array().unwrap().len(), 2);
}

#[test]
fn test_database_migrate_requires_existing_database() {
    let (dir, connection) = setup_test_dir();

    let output = ctrlsnap(dir.path(), &connection, &["database", "migrate"]);

    assert_eq!(output.status.code(), Some(71));
    assert!(!dir.path().join("plant.db").exists());
}

#[test]
fn test_ingest_processes_copies_and_reports() {
    let (dir, connection) = setup_test_dir();
    ctrlsnap(dir.path(), &connection, &["migrate"]);
    let good = write(dir.path(), "Test.L5X", L5X.as_bytes());
    let bad = write(dir.path(), "bad.ACD", b"\x00\x01binary");

    let output = ctrlsnap(
        dir.path(),
        &connection,
        &["ingest", good.to_str().unwrap(), bad.to_str().unwrap(), "--json"],
    );

    // One item failed, so the run is a data error, but the good file landed
    assert_eq!(output.status.code(), Some(65));
    let summary = json(&output);
    assert_eq!(summary["submitted"], 2);
    assert_eq!(summary["upload"]["imported"], 1);
    assert_eq!(summary["upload"]["failed"], 1);
    assert!(good.exists());
    assert!(bad.exists());
}
