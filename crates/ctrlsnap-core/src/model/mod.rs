//! Domain model
//!
//! - `element`: typed controller-project elements produced by a parser
//! - `snapshot`: snapshot header, target identity and retention policy
//! - `source`: queued source descriptors and file kinds
//! - `value`: backend-neutral column values used by table rows and hashing

pub mod element;
pub mod snapshot;
pub mod source;
pub mod value;

pub use element::{
    AddOnInstruction, Controller, ControllerProject, ExportInfo, Module, Parameter, Program, Tag,
};
pub use snapshot::{ImportProvenance, SnapshotAction, SnapshotHeader, SnapshotSummary, TargetKey};
pub use source::{FileKind, SourceDescriptor};
pub use value::Value;
