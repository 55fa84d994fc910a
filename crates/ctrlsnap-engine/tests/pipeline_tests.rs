// Test suite for ingestion queues, workers and pipeline lifecycle
// Covers FIFO order, failure isolation, temp-file cleanup and cancellation

mod common;

use common::{engine, l5x, setup_test_env, write_source};
use ctrlsnap_core::model::{ControllerProject, FileKind, TargetKey};
use ctrlsnap_core::parser::{DefaultParser, ProjectParser};
use ctrlsnap_core::Result;
use ctrlsnap_engine::{
    ingest_channel, Backpressure, IngestEngine, IngestPipeline, IngestWorker, QueueCapacity,
    QueueChannel, QueueConfig, WorkerReport,
};
use ctrlsnap_store::ImportOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn unbounded() -> QueueConfig {
    QueueConfig {
        capacity: QueueCapacity::Unbounded,
        backpressure: Backpressure::Block,
    }
}

#[tokio::test]
async fn test_bad_file_does_not_stop_the_queue() {
    // Given: a pipeline and a bad ACD followed by a good L5X
    let env = setup_test_env().await;
    let pipeline = IngestPipeline::start(
        engine(&env, ImportOptions::default()),
        &unbounded(),
        CancellationToken::new(),
    );
    let bad = write_source(&env.inbox, "bad.ACD", b"\x00garbage");
    let good = write_source(&env.inbox, "Test.L5X", l5x("Line1", &["A", "B"]).as_bytes());
    let paths = [bad.storage_path.clone(), good.storage_path.clone()];

    // When: both are submitted and the queues drained
    pipeline.upload().submit(bad).await.unwrap();
    pipeline.upload().submit(good).await.unwrap();
    let report = pipeline.drain().await.unwrap();

    // Then: the failure is counted, the good file imported, both temp files gone
    assert_eq!(
        report.upload,
        WorkerReport {
            imported: 1,
            unchanged: 0,
            failed: 1,
            dropped: 0
        }
    );
    assert_eq!(report.asset_poll.processed(), 0);
    for path in paths {
        assert!(!path.exists(), "{} should be removed", path.display());
    }
    let current = env
        .database
        .current_snapshot(&TargetKey::new("Controller", "Line1"))
        .await
        .unwrap();
    assert!(current.is_some());
}

#[tokio::test]
async fn test_queue_is_processed_in_fifo_order() {
    let env = setup_test_env().await;
    let pipeline = IngestPipeline::start(
        engine(&env, ImportOptions::default()),
        &unbounded(),
        CancellationToken::new(),
    );
    let names = ["Press1", "Press2", "Press3", "Press4"];

    for name in names {
        let source = write_source(&env.inbox, &format!("{}.L5X", name), l5x(name, &["A"]).as_bytes());
        pipeline.upload().submit(source).await.unwrap();
    }
    pipeline.drain().await.unwrap();

    let mut ids = Vec::new();
    for name in names {
        let snapshot = env
            .database
            .current_snapshot(&TargetKey::new("Controller", name))
            .await
            .unwrap()
            .unwrap();
        ids.push(snapshot.snapshot_id);
    }
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn test_both_queues_feed_the_same_database() {
    let env = setup_test_env().await;
    let pipeline = IngestPipeline::start(
        engine(&env, ImportOptions::default()),
        &QueueConfig::default(),
        CancellationToken::new(),
    );

    let upload = write_source(&env.inbox, "Line1.L5X", l5x("Line1", &["A"]).as_bytes());
    let polled = write_source(&env.inbox, "Line2.L5X", l5x("Line2", &["B"]).as_bytes())
        .with_metadata("asset_id", "7731");
    pipeline.upload().submit(upload).await.unwrap();
    pipeline.asset_poll().submit(polled).await.unwrap();
    let report = pipeline.drain().await.unwrap();

    assert_eq!(report.upload.imported, 1);
    assert_eq!(report.asset_poll.imported, 1);
}

#[tokio::test]
async fn test_cancelled_worker_discards_queued_items() {
    // Given: a queue with items and an already-cancelled token
    let env = setup_test_env().await;
    let (tx, rx) = ingest_channel(QueueChannel::Upload, &unbounded());
    let source = write_source(&env.inbox, "Test.L5X", l5x("Line1", &["A"]).as_bytes());
    let path = source.storage_path.clone();
    tx.submit(source).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    // When: the worker runs
    let report = IngestWorker::new(engine(&env, ImportOptions::default()), rx)
        .run(cancel)
        .await;

    // Then: nothing is processed and the queued file is discarded
    assert_eq!(report.processed(), 0);
    assert_eq!(report.dropped, 1);
    assert!(!path.exists());
}

/// Parser that requests cancellation while an item is in flight
struct CancellingParser {
    cancel: CancellationToken,
}

impl ProjectParser for CancellingParser {
    fn parse(&self, kind: FileKind, bytes: &[u8]) -> Result<ControllerProject> {
        self.cancel.cancel();
        DefaultParser.parse(kind, bytes)
    }
}

#[tokio::test]
async fn test_cancellation_is_honored_between_items() {
    // Given: three queued items and a parser that cancels during the first
    let env = setup_test_env().await;
    let cancel = CancellationToken::new();
    let engine = Arc::new(IngestEngine::new(
        env.database.clone(),
        Arc::new(CancellingParser {
            cancel: cancel.clone(),
        }),
        common::options(ImportOptions::default()),
    ));
    let (tx, rx) = ingest_channel(QueueChannel::Upload, &unbounded());
    let mut paths = Vec::new();
    for name in ["Line1", "Line2", "Line3"] {
        let source = write_source(&env.inbox, &format!("{}.L5X", name), l5x(name, &["A"]).as_bytes());
        paths.push(source.storage_path.clone());
        tx.submit(source).await.unwrap();
    }

    // When: the worker runs
    let report = IngestWorker::new(engine, rx).run(cancel).await;

    // Then: the in-flight item committed and the rest were discarded unimported
    assert_eq!(report.imported, 1);
    assert_eq!(report.processed(), 1);
    assert_eq!(report.dropped, 2);
    for path in &paths {
        assert!(!path.exists(), "{} should be removed", path.display());
    }
    for name in ["Line2", "Line3"] {
        let current = env
            .database
            .current_snapshot(&TargetKey::new("Controller", name))
            .await
            .unwrap();
        assert!(current.is_none());
    }
}

#[tokio::test]
async fn test_shutdown_stops_idle_workers() {
    let env = setup_test_env().await;
    let parent = CancellationToken::new();
    let pipeline = IngestPipeline::start(
        engine(&env, ImportOptions::default()),
        &QueueConfig::default(),
        parent.clone(),
    );
    let sender = pipeline.upload().clone();

    let report = tokio::time::timeout(std::time::Duration::from_secs(5), pipeline.shutdown())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.upload.processed(), 0);
    assert!(!parent.is_cancelled());
    let late = write_source(&env.inbox, "late.L5X", b"<x/>");
    let err = sender.submit(late).await.unwrap_err();
    assert_eq!(err.kind(), ctrlsnap_core::ExErrorKind::QueueClosed);
}

#[tokio::test]
async fn test_shutdown_removes_every_accepted_file() {
    // Given: five accepted sources on the upload queue
    let env = setup_test_env().await;
    let pipeline = IngestPipeline::start(
        engine(&env, ImportOptions::default()),
        &unbounded(),
        CancellationToken::new(),
    );
    let mut paths = Vec::new();
    for i in 0..5 {
        let name = format!("Line{}", i);
        let source = write_source(&env.inbox, &format!("{}.L5X", name), l5x(&name, &["A"]).as_bytes());
        paths.push(source.storage_path.clone());
        pipeline.upload().submit(source).await.unwrap();
    }

    // When: the pipeline is shut down immediately
    let report = pipeline.shutdown().await.unwrap();

    // Then: each item was either processed or dropped, and no temp file remains
    assert_eq!(report.upload.processed() + report.upload.dropped, 5);
    for path in &paths {
        assert!(!path.exists(), "{} should be removed", path.display());
    }
}
