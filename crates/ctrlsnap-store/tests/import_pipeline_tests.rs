// Test suite for the snapshot import unit of work on SQLite
// Covers row projection, retention actions, atomicity and unchanged-source skips

mod common;

use common::{built_db, count, plan_for, test_plan, test_project, TEST_L5X};
use ctrlsnap_core::diff::diff_records;
use ctrlsnap_core::model::{SnapshotAction, Tag, TargetKey};
use ctrlsnap_core::parser::l5x::parse_l5x;
use ctrlsnap_core::ExErrorKind;
use ctrlsnap_store::{ImportOptions, ImportOutcome};

fn options(action: SnapshotAction) -> ImportOptions {
    ImportOptions {
        action,
        skip_unchanged: false,
    }
}

fn target() -> TargetKey {
    TargetKey::new("Controller", "Press_PLC")
}

#[tokio::test]
async fn test_import_writes_snapshot_and_tag_rows() {
    // Given: a built database
    let test_db = built_db().await;

    // When: Test.L5X is imported
    let outcome = test_db
        .db
        .import(test_plan(), ImportOptions::default())
        .await
        .unwrap();

    // Then: one snapshot for the controller and two tags bound to it
    let snapshot_id = outcome.snapshot_id();
    assert_eq!(count(&test_db.path, "SELECT COUNT(*) FROM snapshot"), 1);
    assert_eq!(
        count(
            &test_db.path,
            "SELECT COUNT(*) FROM snapshot WHERE target_type = 'Controller' AND target_name = 'Press_PLC'"
        ),
        1
    );
    assert_eq!(count(&test_db.path, "SELECT COUNT(*) FROM tag"), 2);
    assert_eq!(
        count(
            &test_db.path,
            &format!(
                "SELECT COUNT(*) FROM tag WHERE record_hash IS NOT NULL AND snapshot_id = {}",
                snapshot_id
            )
        ),
        2
    );
    assert_eq!(count(&test_db.path, "SELECT COUNT(*) FROM controller"), 1);

    match outcome {
        ImportOutcome::Imported { rows, superseded, .. } => {
            assert_eq!(rows.get("tag"), Some(&2));
            assert_eq!(rows.get("controller"), Some(&1));
            assert_eq!(superseded, 0);
        }
        other => panic!("expected Imported, got {:?}", other),
    }
}

#[tokio::test]
async fn test_snapshot_records_provenance_and_hash() {
    let test_db = built_db().await;
    let plan = test_plan();
    let expected_hash = plan.header.source_hash;

    test_db.db.import(plan, ImportOptions::default()).await.unwrap();

    let current = test_db.db.current_snapshot(&target()).await.unwrap().unwrap();
    assert_eq!(current.source_hash, expected_hash);
    assert!(current.superseded_by.is_none());
    assert_eq!(
        count(&test_db.path, "SELECT COUNT(*) FROM snapshot WHERE import_user = 'tester'"),
        1
    );
}

#[tokio::test]
async fn test_replace_latest_leaves_one_current_snapshot() {
    // Given: Test.L5X already imported
    let test_db = built_db().await;
    let first = test_db
        .db
        .import(test_plan(), options(SnapshotAction::ReplaceLatest))
        .await
        .unwrap();

    // When: the identical bytes are imported again
    let second = test_db
        .db
        .import(test_plan(), options(SnapshotAction::ReplaceLatest))
        .await
        .unwrap();

    // Then: only the new snapshot and its rows remain
    assert_ne!(first.snapshot_id(), second.snapshot_id());
    let snapshots = test_db.db.snapshots(&target()).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].snapshot_id, second.snapshot_id());
    assert_eq!(count(&test_db.path, "SELECT COUNT(*) FROM tag"), 2);
}

#[tokio::test]
async fn test_supersede_marks_prior_snapshot() {
    let test_db = built_db().await;
    let first = test_db
        .db
        .import(test_plan(), options(SnapshotAction::Supersede))
        .await
        .unwrap();

    let second = test_db
        .db
        .import(test_plan(), options(SnapshotAction::Supersede))
        .await
        .unwrap();

    let snapshots = test_db.db.snapshots(&target()).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].superseded_by, Some(second.snapshot_id()));
    assert!(snapshots[1].superseded_by.is_none());
    let current = test_db.db.current_snapshot(&target()).await.unwrap().unwrap();
    assert_eq!(current.snapshot_id, second.snapshot_id());
    assert_ne!(current.snapshot_id, first.snapshot_id());
    assert_eq!(count(&test_db.path, "SELECT COUNT(*) FROM tag"), 4);
}

#[tokio::test]
async fn test_append_keeps_every_snapshot() {
    let test_db = built_db().await;

    for _ in 0..3 {
        test_db
            .db
            .import(test_plan(), options(SnapshotAction::Append))
            .await
            .unwrap();
    }

    assert_eq!(test_db.db.snapshots(&target()).await.unwrap().len(), 3);
    assert_eq!(
        count(&test_db.path, "SELECT COUNT(*) FROM snapshot WHERE superseded_by IS NULL"),
        3
    );
}

#[tokio::test]
async fn test_failed_import_leaves_no_partial_rows() {
    // Given: a project with a duplicate tag key in one container
    let test_db = built_db().await;
    let mut project = test_project();
    project.tags.push(Tag {
        container: "Press_PLC".into(),
        name: "A".into(),
        ..Default::default()
    });
    let plan = plan_for(&project, TEST_L5X);

    // When: it is imported
    let err = test_db
        .db
        .import(plan, ImportOptions::default())
        .await
        .unwrap_err();

    // Then: the unique violation rolls back every table
    assert_eq!(err.kind(), ExErrorKind::Provider);
    assert_eq!(err.target(), Some("Controller:Press_PLC"));
    for table in ["snapshot", "controller", "module", "program", "tag", "aoi", "parameter"] {
        assert_eq!(
            count(&test_db.path, &format!("SELECT COUNT(*) FROM {}", table)),
            0,
            "{} should be empty",
            table
        );
    }
}

#[tokio::test]
async fn test_failed_replace_keeps_prior_snapshot() {
    let test_db = built_db().await;
    let first = test_db
        .db
        .import(test_plan(), ImportOptions::default())
        .await
        .unwrap();
    let mut project = test_project();
    let duplicate = project.tags[0].clone();
    project.tags.push(duplicate);

    test_db
        .db
        .import(plan_for(&project, TEST_L5X), ImportOptions::default())
        .await
        .unwrap_err();

    let current = test_db.db.current_snapshot(&target()).await.unwrap().unwrap();
    assert_eq!(current.snapshot_id, first.snapshot_id());
    assert_eq!(count(&test_db.path, "SELECT COUNT(*) FROM tag"), 2);
}

#[tokio::test]
async fn test_skip_unchanged_returns_current_snapshot() {
    // Given: Test.L5X imported once
    let test_db = built_db().await;
    let first = test_db
        .db
        .import(test_plan(), ImportOptions::default())
        .await
        .unwrap();

    // When: the same bytes arrive with skip_unchanged
    let skip = ImportOptions {
        action: SnapshotAction::Append,
        skip_unchanged: true,
    };
    let outcome = test_db.db.import(test_plan(), skip).await.unwrap();

    // Then: nothing is written
    assert_eq!(
        outcome,
        ImportOutcome::Unchanged {
            snapshot_id: first.snapshot_id()
        }
    );
    assert_eq!(count(&test_db.path, "SELECT COUNT(*) FROM snapshot"), 1);
}

#[tokio::test]
async fn test_skip_unchanged_imports_changed_source() {
    let test_db = built_db().await;
    test_db
        .db
        .import(test_plan(), ImportOptions::default())
        .await
        .unwrap();

    let changed = String::from_utf8(TEST_L5X.to_vec())
        .unwrap()
        .replace("DataType=\"BOOL\"", "DataType=\"DINT\"");
    let project = parse_l5x(changed.as_bytes()).unwrap();
    let skip = ImportOptions {
        action: SnapshotAction::ReplaceLatest,
        skip_unchanged: true,
    };
    let outcome = test_db
        .db
        .import(plan_for(&project, changed.as_bytes()), skip)
        .await
        .unwrap();

    assert!(matches!(outcome, ImportOutcome::Imported { superseded: 1, .. }));
}

#[tokio::test]
async fn test_record_keys_feed_snapshot_diff() {
    // Given: two appended snapshots, the second changing tag B and adding C
    let test_db = built_db().await;
    let first = test_db
        .db
        .import(test_plan(), options(SnapshotAction::Append))
        .await
        .unwrap();

    let mut project = test_project();
    project.tags[1].data_type = Some("DINT".into());
    project.tags.push(Tag {
        container: "Press_PLC".into(),
        name: "C".into(),
        data_type: Some("REAL".into()),
        ..Default::default()
    });
    let second = test_db
        .db
        .import(plan_for(&project, b"second export"), options(SnapshotAction::Append))
        .await
        .unwrap();

    // When: the tag tables are compared by record hash
    let old = test_db.db.record_keys("tag", first.snapshot_id()).await.unwrap();
    let new = test_db.db.record_keys("tag", second.snapshot_id()).await.unwrap();
    let diff = diff_records(&old, &new);

    // Then: each tag lands in the right bucket
    assert_eq!(diff.unchanged, vec!["Press_PLC/A"]);
    assert_eq!(diff.modified, vec!["Press_PLC/B"]);
    assert_eq!(diff.added, vec!["Press_PLC/C"]);
    assert!(diff.removed.is_empty());
}

#[tokio::test]
async fn test_import_date_is_stamped_at_write_time() {
    // Given: a plan built well before the write happens
    let test_db = built_db().await;
    let plan = test_plan();
    let planned_at = chrono::Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // When: the plan is imported
    test_db
        .db
        .import(plan, ImportOptions::default())
        .await
        .unwrap();

    // Then: the recorded import date is the write time, not the plan time
    let current = test_db.db.current_snapshot(&target()).await.unwrap().unwrap();
    assert!(
        current.import_date > planned_at,
        "import_date {} should follow {}",
        current.import_date,
        planned_at
    );
}
