//! ctrlsnap engine - ingestion orchestration
//!
//! Turns uploaded or polled project files into committed snapshots:
//! configuration, the parse → guard → import sequence, per-target
//! serialization, and the FIFO ingestion queues with one worker each.

pub mod config;
pub mod engine;
pub mod pipeline;
pub mod queue;
pub mod target_lock;
pub mod worker;

pub use config::{
    Backpressure, DatabaseConfig, EngineConfig, ImportConfig, LoggingConfig, QueueCapacity,
    QueueConfig,
};
pub use engine::{IngestEngine, IngestOptions};
pub use pipeline::{IngestPipeline, PipelineReport};
pub use queue::{ingest_channel, IngestReceiver, IngestSender, QueueChannel};
pub use target_lock::{TargetGuard, TargetLocks};
pub use worker::{IngestWorker, WorkerReport};
