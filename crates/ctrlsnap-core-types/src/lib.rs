//! Core types shared across ctrlsnap facilities
//!
//! - **Identifiers**: `SourceId` for queued source files
//! - **Sensitive data**: `Sensitive<T>` marker for automatic redaction
//! - **Schema constants**: Canonical field keys and event names

pub mod ids;
pub mod schema;
pub mod sensitive;

pub use ids::SourceId;
pub use sensitive::Sensitive;
