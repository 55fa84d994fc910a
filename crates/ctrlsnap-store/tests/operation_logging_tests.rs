// Test suite for operation boundary logging in the store
// A single test owns the capture so parallel tests cannot interleave events

mod common;

use common::{built_db, test_plan, unbuilt_db};
use ctrlsnap_core::logging_facility::test_capture::init_test_capture;
use ctrlsnap_store::ImportOptions;

#[tokio::test]
async fn test_lifecycle_and_import_log_their_boundaries() {
    let capture = init_test_capture();
    capture.clear();

    // Given: a freshly built database
    let test_db = built_db().await;
    let data_source = test_db.path.display().to_string();
    let for_this_db =
        |e: &ctrlsnap_core::logging_facility::CapturedEvent| e.field("data_source") == Some(data_source.as_str());

    // Then: build logged one start and one end for this data source
    assert_eq!(
        capture.count_events(|e| e.op.as_deref() == Some("build") && for_this_db(e)),
        2
    );

    // When: the last unit is reverted and re-applied
    test_db.db.revert(20240212143000).await.unwrap();
    test_db.db.migrate().await.unwrap();

    // Then: the re-applied unit logged its own boundary
    capture.assert_event_exists("apply_migration", "start");
    assert_eq!(
        capture.count_events(|e| {
            e.op.as_deref() == Some("apply_migration")
                && e.event.as_deref() == Some("end")
                && e.field("migration_version") == Some("20240520101500")
        }),
        1
    );

    // When: a snapshot is imported
    let outcome = test_db
        .db
        .import(test_plan(), ImportOptions::default())
        .await
        .unwrap();

    // Then: the end event names the committed snapshot
    let snapshot_id = outcome.snapshot_id().to_string();
    assert_eq!(
        capture.count_events(|e| {
            e.op.as_deref() == Some("import")
                && e.event.as_deref() == Some("end")
                && e.field("snapshot_id") == Some(snapshot_id.as_str())
        }),
        1
    );

    // When: an import is attempted against an unbuilt database
    let unbuilt = unbuilt_db();
    unbuilt
        .db
        .import(test_plan(), ImportOptions::default())
        .await
        .unwrap_err();

    // Then: the failure is logged with its stable code
    assert!(
        capture.count_events(|e| {
            e.op.as_deref() == Some("import")
                && e.event.as_deref() == Some("end_error")
                && e.field("err_code") == Some("ERR_MIGRATION_REQUIRED")
        }) >= 1
    );
}
