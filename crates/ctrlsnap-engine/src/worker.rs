//! Queue worker
//!
//! Exactly one worker consumes each queue. Cancellation is checked only
//! while waiting for the next item; an item already taken is processed to
//! completion (commit or rollback) and its temp file removed first.
//!
//! On cancellation the queue is closed and every item still in it is
//! discarded: logged as dropped and its temp file removed.

use ctrlsnap_core::model::SourceDescriptor;
use ctrlsnap_core::{log_op_end, log_op_error, log_op_start};
use ctrlsnap_store::ImportOutcome;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::IngestEngine;
use crate::queue::IngestReceiver;

/// Counts of items handled by one worker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub imported: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Accepted but never processed because the worker was cancelled
    pub dropped: usize,
}

impl WorkerReport {
    pub fn processed(&self) -> usize {
        self.imported + self.unchanged + self.failed
    }
}

pub struct IngestWorker {
    engine: Arc<IngestEngine>,
    receiver: IngestReceiver,
}

impl IngestWorker {
    pub fn new(engine: Arc<IngestEngine>, receiver: IngestReceiver) -> Self {
        Self { engine, receiver }
    }

    /// Process items until cancelled or every sender is dropped.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerReport {
        let queue = self.receiver.channel();
        tracing::info!(queue = %queue, "Ingestion worker started");

        let mut report = WorkerReport::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = self.receiver.recv() => Some(item),
            };
            let Some(next) = next else {
                tracing::info!(queue = %queue, "Ingestion worker cancelled");
                self.discard_queued(&mut report).await;
                break;
            };
            let Some(source) = next else {
                tracing::info!(queue = %queue, "Ingestion queue closed");
                break;
            };
            self.process(source, &mut report).await;
        }

        tracing::info!(
            queue = %queue,
            imported = report.imported,
            unchanged = report.unchanged,
            failed = report.failed,
            dropped = report.dropped,
            "Ingestion worker stopped"
        );
        report
    }

    async fn discard_queued(&mut self, report: &mut WorkerReport) {
        let queue = self.receiver.channel();
        self.receiver.close();
        while let Some(source) = self.receiver.try_recv() {
            tracing::warn!(
                queue = %queue,
                source_id = %source.source_id,
                file_name = %source.file_name,
                "Queued source dropped on shutdown"
            );
            remove_source(&source).await;
            report.dropped += 1;
        }
    }

    async fn process(&self, source: SourceDescriptor, report: &mut WorkerReport) {
        let start = Instant::now();
        let queue = self.receiver.channel();
        log_op_start!(
            "ingest_item",
            queue = %queue,
            source_id = %source.source_id,
            file_name = %source.file_name,
            metadata = ?source.metadata
        );

        let result = self.engine.ingest(&source).await;
        remove_source(&source).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(outcome) => {
                match outcome {
                    ImportOutcome::Imported { .. } => report.imported += 1,
                    ImportOutcome::Unchanged { .. } => report.unchanged += 1,
                }
                log_op_end!(
                    "ingest_item",
                    duration_ms = duration_ms,
                    queue = %queue,
                    source_id = %source.source_id,
                    snapshot_id = outcome.snapshot_id(),
                    row_count = outcome.total_rows()
                );
            }
            Err(e) => {
                report.failed += 1;
                log_op_error!(
                    "ingest_item",
                    e,
                    duration_ms = duration_ms,
                    queue = %queue,
                    source_id = %source.source_id,
                    file_name = %source.file_name
                );
            }
        }
    }
}

async fn remove_source(source: &SourceDescriptor) {
    match tokio::fs::remove_file(&source.storage_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            source_id = %source.source_id,
            path = %source.storage_path.display(),
            error = %e,
            "Failed to remove temporary source file"
        ),
    }
}
