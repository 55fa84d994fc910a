//! Ingestion pipeline
//!
//! Two queues (upload, asset poll), one worker each, sharing one engine and
//! therefore one set of target locks.

use ctrlsnap_core::errors::{ExError, ExErrorKind, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::engine::IngestEngine;
use crate::queue::{ingest_channel, IngestSender, QueueChannel};
use crate::worker::{IngestWorker, WorkerReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub upload: WorkerReport,
    pub asset_poll: WorkerReport,
}

pub struct IngestPipeline {
    upload: IngestSender,
    asset_poll: IngestSender,
    cancel: CancellationToken,
    upload_worker: JoinHandle<WorkerReport>,
    asset_poll_worker: JoinHandle<WorkerReport>,
}

impl IngestPipeline {
    /// Spawn both workers. Migrations must be applied before this is called.
    ///
    /// Cancelling `cancel` (or calling [`IngestPipeline::shutdown`]) stops
    /// the workers between items.
    pub fn start(engine: Arc<IngestEngine>, queue: &QueueConfig, cancel: CancellationToken) -> Self {
        let cancel = cancel.child_token();
        let (upload, upload_rx) = ingest_channel(QueueChannel::Upload, queue);
        let (asset_poll, asset_poll_rx) = ingest_channel(QueueChannel::AssetPoll, queue);

        let upload_worker = tokio::spawn(
            IngestWorker::new(Arc::clone(&engine), upload_rx).run(cancel.clone()),
        );
        let asset_poll_worker =
            tokio::spawn(IngestWorker::new(engine, asset_poll_rx).run(cancel.clone()));

        tracing::info!(
            capacity = %queue.capacity,
            backpressure = ?queue.backpressure,
            "Ingestion pipeline started"
        );

        Self {
            upload,
            asset_poll,
            cancel,
            upload_worker,
            asset_poll_worker,
        }
    }

    pub fn upload(&self) -> &IngestSender {
        &self.upload
    }

    pub fn asset_poll(&self) -> &IngestSender {
        &self.asset_poll
    }

    /// Stop both workers after their current item and wait for them.
    ///
    /// Items still queued are dropped and their temp files removed; the
    /// report counts them as `dropped`.
    ///
    /// # Errors
    ///
    /// `Internal` when a worker task panicked.
    pub async fn shutdown(self) -> Result<PipelineReport> {
        self.cancel.cancel();
        join(self.upload_worker, self.asset_poll_worker).await
    }

    /// Close both queues, let the workers empty them, and wait.
    ///
    /// Sender clones held elsewhere keep their queue open until dropped.
    ///
    /// # Errors
    ///
    /// `Internal` when a worker task panicked.
    pub async fn drain(self) -> Result<PipelineReport> {
        drop(self.upload);
        drop(self.asset_poll);
        join(self.upload_worker, self.asset_poll_worker).await
    }
}

async fn join(
    upload: JoinHandle<WorkerReport>,
    asset_poll: JoinHandle<WorkerReport>,
) -> Result<PipelineReport> {
    let worker_failed = |e: tokio::task::JoinError| {
        ExError::new(ExErrorKind::Internal)
            .with_op("join_worker")
            .with_message(e.to_string())
    };
    let (upload, asset_poll) = tokio::join!(upload, asset_poll);
    let report = PipelineReport {
        upload: upload.map_err(worker_failed)?,
        asset_poll: asset_poll.map_err(worker_failed)?,
    };
    tracing::info!(
        upload_processed = report.upload.processed(),
        asset_poll_processed = report.asset_poll.processed(),
        "Ingestion pipeline stopped"
    );
    Ok(report)
}
