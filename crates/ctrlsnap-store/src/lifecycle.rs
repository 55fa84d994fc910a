//! Database lifecycle guard
//!
//! ```text
//! Unbuilt --build()--> Current
//! Outdated --migrate()--> Current
//! Current: data operations permitted
//! ```
//!
//! The state is derived on every check from the history table and the
//! catalog; nothing caches a previous observation.

use serde::Serialize;

use crate::errors::{migration_required, Result};
use crate::migrations::{Catalog, SchemaState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DatabaseStatus {
    /// No database, or no migration history in it
    Unbuilt,
    /// Some catalog units are not applied
    Outdated { pending: Vec<i64> },
    /// Every catalog unit is applied
    Current { version: i64 },
}

impl DatabaseStatus {
    /// Derive the status from the recorded state (`None` when unbuilt)
    pub fn from_state(state: Option<&SchemaState>, catalog: &Catalog) -> Self {
        let Some(state) = state else {
            return DatabaseStatus::Unbuilt;
        };
        let pending: Vec<i64> = state.pending(catalog).iter().map(|u| u.version).collect();
        if pending.is_empty() {
            DatabaseStatus::Current {
                version: state.latest_version().unwrap_or_default(),
            }
        } else {
            DatabaseStatus::Outdated { pending }
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, DatabaseStatus::Current { .. })
    }

    /// Permit a data operation only on a current database.
    ///
    /// # Errors
    ///
    /// `MigrationRequired` naming `data_source` when unbuilt or outdated.
    pub fn require_current(&self, op: &str, data_source: &str) -> Result<()> {
        match self {
            DatabaseStatus::Current { .. } => Ok(()),
            DatabaseStatus::Unbuilt => Err(migration_required(
                op,
                data_source,
                "database has not been built; run 'build' first",
            )),
            DatabaseStatus::Outdated { pending } => Err(migration_required(
                op,
                data_source,
                format!(
                    "{} pending migration(s) {:?}; run 'migrate' first",
                    pending.len(),
                    pending
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Provider;
    use crate::migrations::AppliedMigration;
    use ctrlsnap_core::errors::ExErrorKind;

    fn state_with(catalog: &Catalog, count: usize) -> SchemaState {
        SchemaState {
            applied: catalog
                .units()
                .iter()
                .take(count)
                .map(|u| AppliedMigration {
                    version: u.version,
                    description: u.description.to_string(),
                    checksum: u.checksum(),
                    applied_at: chrono::Utc::now(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_status_transitions() {
        let catalog = Catalog::for_provider(Provider::Sqlite).unwrap();
        let n = catalog.units().len();

        assert_eq!(DatabaseStatus::from_state(None, &catalog), DatabaseStatus::Unbuilt);

        let outdated = DatabaseStatus::from_state(Some(&state_with(&catalog, n - 1)), &catalog);
        assert_eq!(
            outdated,
            DatabaseStatus::Outdated {
                pending: vec![catalog.latest_version().unwrap()]
            }
        );

        let current = DatabaseStatus::from_state(Some(&state_with(&catalog, n)), &catalog);
        assert!(current.is_current());
    }

    #[test]
    fn test_outdated_guard_names_data_source() {
        let status = DatabaseStatus::Outdated { pending: vec![7] };
        let err = status.require_current("import", "plant.db").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::MigrationRequired);
        assert_eq!(err.data_source(), Some("plant.db"));
    }

    #[test]
    fn test_unbuilt_guard_is_migration_required() {
        let err = DatabaseStatus::Unbuilt
            .require_current("import", "plant.db")
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::MigrationRequired);
    }
}
