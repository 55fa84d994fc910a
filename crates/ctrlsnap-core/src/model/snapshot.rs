//! Snapshot header model and retention policy
//!
//! A snapshot is created exactly once per successfully committed source
//! file and never mutated afterwards; only the retention policy of a later
//! import may mark it superseded or remove it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{ExError, ExErrorKind};
use crate::hashing::{source_hash, Digest};
use crate::model::element::ExportInfo;

/// Retention policy applied when a new snapshot of an existing target commits
///
/// Whatever the policy, the new snapshot is inserted before prior snapshots
/// are touched, inside the same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotAction {
    /// Keep full history; nothing is superseded
    Append,
    /// Hard-delete every prior snapshot of the target (rows cascade)
    #[default]
    ReplaceLatest,
    /// Keep prior snapshots but point their `superseded_by` at the new one
    Supersede,
}

impl SnapshotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotAction::Append => "append",
            SnapshotAction::ReplaceLatest => "replace_latest",
            SnapshotAction::Supersede => "supersede",
        }
    }
}

impl fmt::Display for SnapshotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotAction {
    type Err = ExError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "append" => Ok(SnapshotAction::Append),
            "replace_latest" | "replacelatest" | "replace" => Ok(SnapshotAction::ReplaceLatest),
            "supersede" => Ok(SnapshotAction::Supersede),
            other => Err(ExError::new(ExErrorKind::Configuration)
                .with_op("parse_snapshot_action")
                .with_message(format!("unknown snapshot action '{}'", other))),
        }
    }
}

/// `(target_type, target_name)` identity shared by every snapshot of a target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub target_type: String,
    pub target_name: String,
}

impl TargetKey {
    pub fn new(target_type: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            target_name: target_name.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_type, self.target_name)
    }
}

/// Who and where an import ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProvenance {
    pub user: String,
    pub machine: String,
}

impl ImportProvenance {
    /// Provenance of the current process, from the usual environment variables
    pub fn from_env() -> Self {
        let lookup = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()))
                .unwrap_or_else(|| "unknown".to_string())
        };
        Self {
            user: lookup(&["USER", "USERNAME"]),
            machine: lookup(&["HOSTNAME", "COMPUTERNAME"]),
        }
    }
}

/// Everything written to the `snapshot` row except the generated id and
/// `import_date`, which the store stamps when the row is inserted
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotHeader {
    pub target_type: String,
    pub target_name: String,
    pub is_partial: bool,
    pub schema_revision: Option<String>,
    pub software_revision: Option<String>,
    pub export_date: Option<DateTime<Utc>>,
    pub export_options: Option<String>,
    pub import_user: String,
    pub import_machine: String,
    pub source_hash: Digest,
    pub source_data: Option<Vec<u8>>,
}

impl SnapshotHeader {
    /// Build the header for raw source bytes and their parsed export envelope
    pub fn new(
        export: &ExportInfo,
        source: &[u8],
        provenance: &ImportProvenance,
        keep_source_data: bool,
    ) -> Self {
        Self {
            target_type: export.target_type.clone(),
            target_name: export.target_name.clone(),
            is_partial: export.contains_context,
            schema_revision: export.schema_revision.clone(),
            software_revision: export.software_revision.clone(),
            export_date: export.export_date,
            export_options: export.export_options.clone(),
            import_user: provenance.user.clone(),
            import_machine: provenance.machine.clone(),
            source_hash: source_hash(source),
            source_data: keep_source_data.then(|| source.to_vec()),
        }
    }

    pub fn target(&self) -> TargetKey {
        TargetKey::new(&self.target_type, &self.target_name)
    }
}

/// A committed snapshot as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub snapshot_id: i64,
    pub target_type: String,
    pub target_name: String,
    pub import_date: DateTime<Utc>,
    pub source_hash: Digest,
    pub superseded_by: Option<i64>,
}
