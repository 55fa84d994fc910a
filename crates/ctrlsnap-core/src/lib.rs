//! ctrlsnap Core - element model, hashing and error/logging facilities
//!
//! This crate provides the storage-independent half of snapshot ingestion:
//! - Typed controller-project elements (`ControllerProject` and friends)
//! - Snapshot header model and retention policy (`SnapshotAction`)
//! - Source descriptors for queued files (`SourceDescriptor`, `FileKind`)
//! - Deterministic source and record hashing plus record diffing
//! - The `ProjectParser` collaborator seam and a bundled L5X reader
//! - Canonical error and logging facilities shared by every crate

pub mod diff;
pub mod errors;
pub mod hashing;
pub mod logging_facility;
pub mod model;
pub mod parser;

// Re-export commonly used types
pub use errors::{ExError, ExErrorKind, Result};
pub use model::{
    ControllerProject, FileKind, SnapshotAction, SnapshotHeader, SourceDescriptor, Value,
};
pub use parser::{DefaultParser, ProjectParser};

// Logging macros expand to `$crate::core_types::schema::*`
pub use ctrlsnap_core_types as core_types;
