// Test suite for IngestEngine: parse, guard and import for one source
// Includes per-target serialization across concurrent callers

mod common;

use common::{count, engine, l5x, query_string, setup_test_env, write_source};
use ctrlsnap_core::model::{SnapshotAction, TargetKey};
use ctrlsnap_core::ExErrorKind;
use ctrlsnap_engine::IngestEngine;
use ctrlsnap_store::{Catalog, ConnectionDescriptor, Database, ImportOptions, ImportOutcome, Provider};
use std::sync::Arc;

#[tokio::test]
async fn test_ingest_l5x_creates_snapshot() {
    // Given: a built database and an L5X source
    let env = setup_test_env().await;
    let engine = engine(&env, ImportOptions::default());
    let source = write_source(&env.inbox, "Test.L5X", l5x("Line1", &["A", "B"]).as_bytes());

    // When: the source is ingested
    let outcome = engine.ingest(&source).await.unwrap();

    // Then: one snapshot with both tags, and the file is left for the caller
    assert!(matches!(outcome, ImportOutcome::Imported { .. }));
    assert_eq!(count(&env.db_path, "SELECT COUNT(*) FROM snapshot"), 1);
    assert_eq!(count(&env.db_path, "SELECT COUNT(*) FROM tag"), 2);
    assert_eq!(
        query_string(&env.db_path, "SELECT import_user FROM snapshot"),
        "svc_ingest"
    );
    assert!(source.storage_path.exists());
}

#[tokio::test]
async fn test_metadata_import_user_overrides_configured_user() {
    let env = setup_test_env().await;
    let engine = engine(&env, ImportOptions::default());
    let source = write_source(&env.inbox, "Test.L5X", l5x("Line1", &["A"]).as_bytes())
        .with_metadata("import_user", "jdoe");

    engine.ingest(&source).await.unwrap();

    assert_eq!(query_string(&env.db_path, "SELECT import_user FROM snapshot"), "jdoe");
    assert_eq!(
        query_string(&env.db_path, "SELECT import_machine FROM snapshot"),
        "ingest-01"
    );
}

#[tokio::test]
async fn test_acd_without_reader_is_format_error() {
    let env = setup_test_env().await;
    let engine = engine(&env, ImportOptions::default());
    let source = write_source(&env.inbox, "bad.ACD", b"\x00\x01not a project");

    let err = engine.ingest(&source).await.unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::Format);
    assert_eq!(err.source_id(), Some(&source.source_id));
    assert_eq!(count(&env.db_path, "SELECT COUNT(*) FROM snapshot"), 0);
}

#[tokio::test]
async fn test_malformed_l5x_is_format_error() {
    let env = setup_test_env().await;
    let engine = engine(&env, ImportOptions::default());
    let source = write_source(&env.inbox, "broken.L5X", b"<RSLogix5000Content><Controller");

    let err = engine.ingest(&source).await.unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::Format);
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let env = setup_test_env().await;
    let engine = engine(&env, ImportOptions::default());
    let source = write_source(&env.inbox, "gone.L5X", b"x");
    std::fs::remove_file(&source.storage_path).unwrap();

    let err = engine.ingest(&source).await.unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::NotFound);
}

#[tokio::test]
async fn test_outdated_database_is_migration_required() {
    // Given: a database missing the newest migration
    let env = setup_test_env().await;
    let outdated_path = env.dir.path().join("outdated.db");
    let descriptor = ConnectionDescriptor::sqlite(outdated_path.display().to_string());
    let partial = Catalog::for_provider(Provider::Sqlite)
        .unwrap()
        .up_to(20240212143000);
    Database::with_catalog(&descriptor, partial)
        .unwrap()
        .build()
        .await
        .unwrap();
    let engine = IngestEngine::new(
        Database::resolve(&descriptor).unwrap(),
        Arc::new(ctrlsnap_core::DefaultParser),
        common::options(ImportOptions::default()),
    );

    // When: a valid source is ingested
    let source = write_source(&env.inbox, "Test.L5X", l5x("Line1", &["A"]).as_bytes());
    let err = engine.ingest(&source).await.unwrap_err();

    // Then: nothing is written
    assert_eq!(err.kind(), ExErrorKind::MigrationRequired);
    assert_eq!(count(&outdated_path, "SELECT COUNT(*) FROM snapshot"), 0);
}

#[tokio::test]
async fn test_concurrent_replace_latest_leaves_one_snapshot() {
    // Given: many sources for the same target ingested at once
    let env = setup_test_env().await;
    let engine = engine(
        &env,
        ImportOptions {
            action: SnapshotAction::ReplaceLatest,
            skip_unchanged: false,
        },
    );
    let sources: Vec<_> = (0..6)
        .map(|i| {
            let tag = format!("T{}", i);
            write_source(&env.inbox, "Line1.L5X", l5x("Line1", &[&tag]).as_bytes())
        })
        .collect();

    // When: they race through the engine
    let tasks: Vec<_> = sources
        .into_iter()
        .map(|source| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.ingest(&source).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Then: exactly one snapshot survives with its own single tag
    let snapshots = engine
        .database()
        .snapshots(&TargetKey::new("Controller", "Line1"))
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(count(&env.db_path, "SELECT COUNT(*) FROM tag"), 1);
}

#[tokio::test]
async fn test_store_source_data_keeps_raw_bytes() {
    let env = setup_test_env().await;
    let mut options = common::options(ImportOptions::default());
    options.store_source_data = true;
    let engine = IngestEngine::new(
        env.database.clone(),
        Arc::new(ctrlsnap_core::DefaultParser),
        options,
    );
    let content = l5x("Line1", &["A"]);
    let source = write_source(&env.inbox, "Test.L5X", content.as_bytes());

    engine.ingest(&source).await.unwrap();

    assert_eq!(
        count(&env.db_path, "SELECT length(source_data) FROM snapshot"),
        content.len() as i64
    );
}
