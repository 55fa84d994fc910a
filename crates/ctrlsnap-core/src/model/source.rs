//! Source descriptors for queued files
//!
//! A descriptor is produced by an upload or poll event and consumed exactly
//! once by an ingestion worker. Ownership of the file at `storage_path`
//! moves to the worker when the descriptor is accepted onto a queue.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::{ExError, ExErrorKind, Result};
use ctrlsnap_core_types::SourceId;

/// Supported project file kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// XML project export
    L5X,
    /// Binary project archive
    Acd,
}

impl FileKind {
    /// Derive the kind from a file name's extension, case-insensitively
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_uppercase());

        match ext.as_deref() {
            Some("L5X") => Ok(FileKind::L5X),
            Some("ACD") => Ok(FileKind::Acd),
            _ => Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("file_kind")
                .with_message(format!(
                    "unsupported file '{}': expected a .L5X or .ACD extension",
                    file_name
                ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::L5X => "L5X",
            FileKind::Acd => "ACD",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One ingestible source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub source_id: SourceId,
    /// Original file name as supplied by the producer
    pub file_name: String,
    pub file_kind: FileKind,
    /// Where the bytes currently live (temporary once enqueued)
    pub storage_path: PathBuf,
    pub metadata: HashMap<String, String>,
}

impl SourceDescriptor {
    /// Describe a file, deriving its kind from `file_name`
    pub fn new(
        file_name: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        metadata: HashMap<String, String>,
    ) -> Result<Self> {
        let file_name = file_name.into();
        let file_kind = FileKind::from_file_name(&file_name)?;
        Ok(Self {
            source_id: SourceId::new(),
            file_name,
            file_kind,
            storage_path: storage_path.into(),
            metadata,
        })
    }

    /// Describe a file using its own name
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ExError::new(ExErrorKind::InvalidInput)
                    .with_op("source_from_path")
                    .with_message(format!("'{}' has no file name", path.display()))
            })?;
        Self::new(file_name, path, HashMap::new())
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
