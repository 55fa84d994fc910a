//! Migration framework
//!
//! Provides:
//! - Per-provider catalogs of `MigrationUnit`s, strictly ascending by version
//! - `SchemaState` read from the in-database history table
//! - Checksum verification of applied units against the catalog
//! - Runners for SQLite (`sqlite`) and SQL Server (`sqlserver`)
//!
//! Each unit's script and its history row are written in one transaction,
//! so an interrupted unit is simply "not applied".

mod catalog;
mod checksums;
pub mod sqlite;
pub mod sqlserver;

use chrono::{DateTime, Utc};
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::connection::Provider;
use crate::errors::{checksum_mismatch, Result};

pub use checksums::compute_checksum;

/// Name of the history table inside every managed database
pub const HISTORY_TABLE: &str = "__migration_history";

/// One schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    /// `yyyymmddHHMMSS` timestamp; unique within a catalog
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
    pub down: Option<&'static str>,
}

impl MigrationUnit {
    pub fn checksum(&self) -> String {
        compute_checksum(self.up)
    }
}

/// Ordered, provider-specific set of migration units
#[derive(Debug, Clone)]
pub struct Catalog {
    provider: Provider,
    units: Vec<MigrationUnit>,
}

impl Catalog {
    /// Build a catalog, rejecting ties and out-of-order versions.
    ///
    /// # Errors
    ///
    /// `Internal` when versions are not strictly ascending.
    pub fn new(provider: Provider, units: Vec<MigrationUnit>) -> Result<Self> {
        for pair in units.windows(2) {
            if pair[0].version >= pair[1].version {
                return Err(ExError::new(ExErrorKind::Internal)
                    .with_op("load_catalog")
                    .with_message(format!(
                        "{} catalog is not strictly ascending at version {}",
                        provider, pair[1].version
                    )));
            }
        }
        Ok(Self { provider, units })
    }

    /// The embedded catalog for `provider`
    ///
    /// # Errors
    ///
    /// `Internal` if the embedded catalog is malformed.
    pub fn for_provider(provider: Provider) -> Result<Self> {
        Self::new(provider, catalog::units_for(provider))
    }

    /// A prefix of this catalog containing units up to and including `version`
    pub fn up_to(&self, version: i64) -> Self {
        Self {
            provider: self.provider,
            units: self
                .units
                .iter()
                .filter(|u| u.version <= version)
                .cloned()
                .collect(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn get(&self, version: i64) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.version == version)
    }

    pub fn latest_version(&self) -> Option<i64> {
        self.units.last().map(|u| u.version)
    }
}

/// A row of the history table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub description: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

/// Applied migrations as recorded in the database, ascending by version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaState {
    pub applied: Vec<AppliedMigration>,
}

impl SchemaState {
    pub fn applied_versions(&self) -> BTreeSet<i64> {
        self.applied.iter().map(|m| m.version).collect()
    }

    pub fn latest_version(&self) -> Option<i64> {
        self.applied.iter().map(|m| m.version).max()
    }

    /// Catalog units not yet applied, ascending by version
    pub fn pending<'c>(&self, catalog: &'c Catalog) -> Vec<&'c MigrationUnit> {
        let applied = self.applied_versions();
        catalog
            .units()
            .iter()
            .filter(|u| !applied.contains(&u.version))
            .collect()
    }

    /// Check every applied unit against the catalog.
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` when a recorded checksum differs from the catalog
    /// script, or when the database records a version the catalog lacks.
    pub fn verify(&self, catalog: &Catalog) -> Result<()> {
        for applied in &self.applied {
            let unit = catalog.get(applied.version).ok_or_else(|| {
                ExError::new(ExErrorKind::ChecksumMismatch)
                    .with_op("migration_checksum")
                    .with_message(format!(
                        "database records migration {} which is not in the {} catalog",
                        applied.version,
                        catalog.provider()
                    ))
            })?;
            let expected = unit.checksum();
            if expected != applied.checksum {
                return Err(checksum_mismatch(applied.version, &expected, &applied.checksum));
            }
        }
        Ok(())
    }
}
