//! Parser collaborator seam
//!
//! The ingestion pipeline only needs "bytes in, typed elements out". A
//! `ProjectParser` implementation owns the file formats; a parse failure is
//! reported as `ExErrorKind::Format` and is never retried for that file.

pub mod l5x;

use crate::errors::{ExError, ExErrorKind, Result};
use crate::model::{ControllerProject, FileKind};

/// Turns raw project file bytes into a queryable element graph
pub trait ProjectParser: Send + Sync {
    /// Parse `bytes` of the given kind.
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Format` when the content is malformed or the kind is
    /// not supported by this parser.
    fn parse(&self, kind: FileKind, bytes: &[u8]) -> Result<ControllerProject>;
}

/// Parser handling L5X with the bundled reader.
///
/// ACD archives are a proprietary binary format; they are rejected with a
/// format error unless a parser that understands them is supplied instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParser;

impl ProjectParser for DefaultParser {
    fn parse(&self, kind: FileKind, bytes: &[u8]) -> Result<ControllerProject> {
        match kind {
            FileKind::L5X => l5x::parse_l5x(bytes).map_err(ExError::from),
            FileKind::Acd => Err(ExError::new(ExErrorKind::Format)
                .with_op("parse")
                .with_message("no ACD reader is configured for this parser")),
        }
    }
}
