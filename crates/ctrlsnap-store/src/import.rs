//! Import plans and outcomes
//!
//! An `ImportPlan` carries the snapshot header plus every projected, hashed
//! row, grouped per table in registry order. It is built before any session
//! is opened so projection failures never touch the database and the write
//! transaction only does I/O.

use ctrlsnap_core::hashing::{record_hash, Digest};
use ctrlsnap_core::model::TargetKey;
use ctrlsnap_core::{ControllerProject, SnapshotAction, SnapshotHeader, Value};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::errors::Result;
use crate::table_map::{table_maps, TableMap};

/// A projected row with its record hash
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRow {
    pub values: Vec<Value>,
    pub record_hash: Digest,
}

/// All rows destined for one table
#[derive(Debug)]
pub struct PlannedTable {
    pub map: &'static TableMap,
    pub rows: Vec<PlannedRow>,
}

#[derive(Debug)]
pub struct ImportPlan {
    pub header: SnapshotHeader,
    pub tables: Vec<PlannedTable>,
}

impl ImportPlan {
    /// Project and hash every registered element kind.
    ///
    /// # Errors
    ///
    /// `Projection` if any element lacks data its table map requires.
    pub fn build(project: &ControllerProject, header: SnapshotHeader) -> Result<Self> {
        Self::build_with(project, header, table_maps())
    }

    /// As `build`, with an explicit set of maps
    ///
    /// # Errors
    ///
    /// `Projection` if any element lacks data its table map requires.
    pub fn build_with(
        project: &ControllerProject,
        header: SnapshotHeader,
        maps: &'static [TableMap],
    ) -> Result<Self> {
        let tables = maps
            .iter()
            .map(|map| {
                let rows = map
                    .rows(project)?
                    .into_iter()
                    .map(|values| PlannedRow {
                        record_hash: record_hash(&values),
                        values,
                    })
                    .collect();
                Ok(PlannedTable { map, rows })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { header, tables })
    }

    pub fn target(&self) -> TargetKey {
        self.header.target()
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Per-import behavior chosen by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub action: SnapshotAction,
    /// Commit nothing when the source hash equals the target's current snapshot
    pub skip_unchanged: bool,
}

/// Result of one committed (or skipped) import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImportOutcome {
    Imported {
        snapshot_id: i64,
        /// Rows written per table
        rows: BTreeMap<String, usize>,
        /// Prior snapshots deleted (replace latest) or marked (supersede)
        superseded: usize,
    },
    Unchanged {
        snapshot_id: i64,
    },
}

impl ImportOutcome {
    pub fn snapshot_id(&self) -> i64 {
        match self {
            ImportOutcome::Imported { snapshot_id, .. } | ImportOutcome::Unchanged { snapshot_id } => {
                *snapshot_id
            }
        }
    }

    pub fn total_rows(&self) -> usize {
        match self {
            ImportOutcome::Imported { rows, .. } => rows.values().sum(),
            ImportOutcome::Unchanged { .. } => 0,
        }
    }
}
