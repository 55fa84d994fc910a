//! Ingestion queues
//!
//! One FIFO per source channel. Submission validates the file first: only
//! a non-empty regular file whose extension matches its `FileKind` is
//! accepted. Ownership of the temporary file passes to the queue once
//! `submit` returns `Ok`; on `Err` the caller still owns it.

use ctrlsnap_core::errors::{ExError, ExErrorKind, Result};
use ctrlsnap_core::model::{FileKind, SourceDescriptor};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::{Backpressure, QueueCapacity, QueueConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueChannel {
    /// Files uploaded by a user
    Upload,
    /// Files fetched from an external asset repository
    AssetPoll,
}

impl QueueChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueChannel::Upload => "upload",
            QueueChannel::AssetPoll => "asset_poll",
        }
    }
}

impl fmt::Display for QueueChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
enum SenderInner {
    Bounded(mpsc::Sender<SourceDescriptor>),
    Unbounded(mpsc::UnboundedSender<SourceDescriptor>),
}

#[derive(Debug)]
enum ReceiverInner {
    Bounded(mpsc::Receiver<SourceDescriptor>),
    Unbounded(mpsc::UnboundedReceiver<SourceDescriptor>),
}

/// Producer side of one ingestion queue
#[derive(Debug, Clone)]
pub struct IngestSender {
    channel: QueueChannel,
    backpressure: Backpressure,
    inner: SenderInner,
}

/// Consumer side; owned by exactly one worker
#[derive(Debug)]
pub struct IngestReceiver {
    channel: QueueChannel,
    inner: ReceiverInner,
}

/// Create one queue for `channel`
pub fn ingest_channel(channel: QueueChannel, config: &QueueConfig) -> (IngestSender, IngestReceiver) {
    let (tx, rx) = match config.capacity {
        QueueCapacity::Bounded(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (SenderInner::Bounded(tx), ReceiverInner::Bounded(rx))
        }
        QueueCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (SenderInner::Unbounded(tx), ReceiverInner::Unbounded(rx))
        }
    };
    (
        IngestSender {
            channel,
            backpressure: config.backpressure,
            inner: tx,
        },
        IngestReceiver { channel, inner: rx },
    )
}

fn closed(channel: QueueChannel, descriptor: &SourceDescriptor) -> ExError {
    ExError::new(ExErrorKind::QueueClosed)
        .with_op("submit")
        .with_source_id(descriptor.source_id.clone())
        .with_message(format!("{} queue is closed", channel))
}

impl IngestSender {
    pub fn channel(&self) -> QueueChannel {
        self.channel
    }

    /// Validate and enqueue a source.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `InvalidInput` when the file is missing, empty, not a
    ///   regular file, or its extension disagrees with `file_kind`
    /// - `QueueFull` when bounded with `Reject` backpressure and full
    /// - `QueueClosed` when the worker has stopped
    pub async fn submit(&self, descriptor: SourceDescriptor) -> Result<()> {
        validate_source(&descriptor).await?;

        match &self.inner {
            SenderInner::Unbounded(tx) => tx
                .send(descriptor)
                .map_err(|e| closed(self.channel, &e.0)),
            SenderInner::Bounded(tx) => match self.backpressure {
                Backpressure::Block => tx
                    .send(descriptor)
                    .await
                    .map_err(|e| closed(self.channel, &e.0)),
                Backpressure::Reject => tx.try_send(descriptor).map_err(|e| match e {
                    TrySendError::Full(d) => ExError::new(ExErrorKind::QueueFull)
                        .with_op("submit")
                        .with_source_id(d.source_id.clone())
                        .with_message(format!("{} queue is full", self.channel)),
                    TrySendError::Closed(d) => closed(self.channel, &d),
                }),
            },
        }?;

        tracing::debug!(queue = %self.channel, "Source enqueued");
        Ok(())
    }
}

impl IngestReceiver {
    pub fn channel(&self) -> QueueChannel {
        self.channel
    }

    /// Next source in FIFO order; `None` once every sender is gone and the
    /// queue is empty
    pub async fn recv(&mut self) -> Option<SourceDescriptor> {
        match &mut self.inner {
            ReceiverInner::Bounded(rx) => rx.recv().await,
            ReceiverInner::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Refuse further submissions; items already queued stay receivable.
    pub fn close(&mut self) {
        match &mut self.inner {
            ReceiverInner::Bounded(rx) => rx.close(),
            ReceiverInner::Unbounded(rx) => rx.close(),
        }
    }

    /// Next queued source without waiting
    pub fn try_recv(&mut self) -> Option<SourceDescriptor> {
        match &mut self.inner {
            ReceiverInner::Bounded(rx) => rx.try_recv().ok(),
            ReceiverInner::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

async fn validate_source(descriptor: &SourceDescriptor) -> Result<()> {
    let invalid = |message: String| {
        ExError::new(ExErrorKind::InvalidInput)
            .with_op("submit")
            .with_source_id(descriptor.source_id.clone())
            .with_message(message)
    };

    let kind = FileKind::from_file_name(&descriptor.file_name)
        .map_err(|e| e.with_source_id(descriptor.source_id.clone()))?;
    if kind != descriptor.file_kind {
        return Err(invalid(format!(
            "'{}' does not have a .{} extension",
            descriptor.file_name, descriptor.file_kind
        )));
    }

    let metadata = tokio::fs::metadata(&descriptor.storage_path)
        .await
        .map_err(|e| {
            ExError::from(e)
                .with_op("submit")
                .with_source_id(descriptor.source_id.clone())
        })?;
    if !metadata.is_file() {
        return Err(invalid(format!(
            "'{}' is not a regular file",
            descriptor.storage_path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(invalid(format!("'{}' is empty", descriptor.file_name)));
    }
    Ok(())
}
