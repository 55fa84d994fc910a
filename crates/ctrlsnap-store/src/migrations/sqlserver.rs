//! SQL Server migration runner
//!
//! Same contract as the SQLite runner: one explicit transaction per unit,
//! the history row written inside it.

use chrono::NaiveDateTime;
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::{log_op_end, log_op_error, log_op_start};
use std::time::Instant;

use crate::errors::{from_tiberius, migration_error, migration_required, Result};
use crate::migrations::{AppliedMigration, Catalog, MigrationUnit, SchemaState};
use crate::sqlserver::session::{as_refs, SqlParam};
use crate::sqlserver::{batch, begin, finish, scalar_i32, SqlClient};

const CREATE_HISTORY: &str = "IF OBJECT_ID(N'dbo.__migration_history', N'U') IS NULL
CREATE TABLE dbo.__migration_history (
    version BIGINT NOT NULL CONSTRAINT pk_migration_history PRIMARY KEY,
    description NVARCHAR(255) NOT NULL,
    checksum CHAR(64) NOT NULL,
    applied_at DATETIME2 NOT NULL
        CONSTRAINT df_migration_history_applied_at DEFAULT SYSUTCDATETIME()
)";

pub async fn history_exists(client: &mut SqlClient) -> Result<bool> {
    let found = scalar_i32(
        client,
        "SELECT CASE WHEN OBJECT_ID(N'dbo.__migration_history', N'U') IS NULL THEN 0 ELSE 1 END",
        &[],
    )
    .await?;
    Ok(found == 1)
}

async fn user_table_count(client: &mut SqlClient) -> Result<i32> {
    scalar_i32(
        client,
        "SELECT COUNT(*) FROM sys.tables WHERE is_ms_shipped = 0",
        &[],
    )
    .await
}

/// Read the history table; `None` when the database was never built
pub async fn read_state(client: &mut SqlClient) -> Result<Option<SchemaState>> {
    if !history_exists(client).await? {
        return Ok(None);
    }

    let rows = client
        .query(
            "SELECT version, description, checksum, applied_at
             FROM dbo.__migration_history ORDER BY version",
            &[],
        )
        .await
        .map_err(from_tiberius)?
        .into_first_result()
        .await
        .map_err(from_tiberius)?;

    let applied = rows
        .iter()
        .map(|row| {
            let missing = |col: &str| {
                ExError::new(ExErrorKind::Provider)
                    .with_op("read_migration_history")
                    .with_message(format!("history column '{}' is NULL", col))
            };
            let version: i64 = row
                .try_get(0)
                .map_err(from_tiberius)?
                .ok_or_else(|| missing("version"))?;
            let description: &str = row
                .try_get(1)
                .map_err(from_tiberius)?
                .ok_or_else(|| missing("description"))?;
            let checksum: &str = row
                .try_get(2)
                .map_err(from_tiberius)?
                .ok_or_else(|| missing("checksum"))?;
            let applied_at: NaiveDateTime = row
                .try_get(3)
                .map_err(from_tiberius)?
                .ok_or_else(|| missing("applied_at"))?;
            Ok(AppliedMigration {
                version,
                description: description.to_string(),
                checksum: checksum.trim().to_string(),
                applied_at: applied_at.and_utc(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(SchemaState { applied }))
}

async fn run_unit_script(client: &mut SqlClient, unit: &MigrationUnit) -> Result<()> {
    batch(client, unit.up)
        .await
        .map_err(|e| migration_error(unit.version, e.message()))?;
    let checksum = unit.checksum();
    let params = [
        SqlParam::Int(Some(unit.version)),
        SqlParam::Text(Some(unit.description)),
        SqlParam::Text(Some(&checksum)),
    ];
    client
        .execute(
            "INSERT INTO dbo.__migration_history (version, description, checksum)
             VALUES (@P1, @P2, @P3)",
            &as_refs(&params),
        )
        .await
        .map_err(from_tiberius)?;
    Ok(())
}

/// Initialize a fresh database with the full catalog in one transaction.
///
/// # Errors
///
/// - `MigrationRequired` if the database has history with pending units
/// - `InvalidInput` if the database has tables but no history
/// - `Provider` if a script fails; nothing is kept
pub async fn build(client: &mut SqlClient, catalog: &Catalog, data_source: &str) -> Result<Vec<i64>> {
    if let Some(state) = read_state(client).await? {
        state.verify(catalog)?;
        let pending = state.pending(catalog);
        if pending.is_empty() {
            tracing::info!(data_source, "Database already built and current");
            return Ok(Vec::new());
        }
        return Err(migration_required(
            "build",
            data_source,
            format!(
                "database already has migration history with {} pending unit(s); run 'migrate'",
                pending.len()
            ),
        ));
    }

    if user_table_count(client).await? > 0 {
        return Err(ExError::new(ExErrorKind::InvalidInput)
            .with_op("build")
            .with_data_source(data_source.to_string())
            .with_message("database has tables but no migration history; refusing to build"));
    }

    begin(client).await?;
    let result = async {
        batch(client, CREATE_HISTORY).await?;
        let mut applied = Vec::with_capacity(catalog.units().len());
        for unit in catalog.units() {
            run_unit_script(client, unit).await?;
            applied.push(unit.version);
        }
        Ok::<_, ExError>(applied)
    }
    .await;
    finish(client, result).await
}

/// Apply all pending units in ascending order, one transaction each.
///
/// # Errors
///
/// - `ChecksumMismatch` if applied history disagrees with the catalog
/// - `Provider` for the first failing unit
pub async fn migrate(client: &mut SqlClient, catalog: &Catalog) -> Result<Vec<i64>> {
    batch(client, CREATE_HISTORY).await?;
    let state = read_state(client).await?.unwrap_or_default();
    state.verify(catalog)?;

    let mut applied = Vec::new();
    for unit in state.pending(catalog) {
        let start = Instant::now();
        log_op_start!("apply_migration", migration_version = unit.version);

        begin(client).await?;
        let result = run_unit_script(client, unit).await;
        let result = finish(client, result).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => log_op_end!(
                "apply_migration",
                duration_ms = duration_ms,
                migration_version = unit.version
            ),
            Err(e) => {
                log_op_error!(
                    "apply_migration",
                    e.clone(),
                    duration_ms = duration_ms,
                    migration_version = unit.version
                );
                return Err(e);
            }
        }
        applied.push(unit.version);
    }
    Ok(applied)
}

/// Revert applied units above `to_version`, newest first.
///
/// # Errors
///
/// - `InvalidInput` if any unit to revert has no down script
/// - `ChecksumMismatch` if applied history disagrees with the catalog
/// - `Provider` for the first failing unit
pub async fn revert(client: &mut SqlClient, catalog: &Catalog, to_version: i64) -> Result<Vec<i64>> {
    let state = read_state(client).await?.unwrap_or_default();
    state.verify(catalog)?;

    let mut targets: Vec<&MigrationUnit> = state
        .applied
        .iter()
        .filter(|a| a.version > to_version)
        .filter_map(|a| catalog.get(a.version))
        .collect();
    targets.sort_by(|a, b| b.version.cmp(&a.version));

    if let Some(unit) = targets.iter().find(|u| u.down.is_none()) {
        return Err(ExError::new(ExErrorKind::InvalidInput)
            .with_op("revert")
            .with_message(format!("migration {} has no down script", unit.version)));
    }

    let mut reverted = Vec::with_capacity(targets.len());
    for unit in targets {
        begin(client).await?;
        let result = async {
            batch(client, unit.down.unwrap_or_default())
                .await
                .map_err(|e| migration_error(unit.version, e.message()))?;
            let params = [SqlParam::Int(Some(unit.version))];
            client
                .execute(
                    "DELETE FROM dbo.__migration_history WHERE version = @P1",
                    &as_refs(&params),
                )
                .await
                .map_err(from_tiberius)?;
            Ok::<_, ExError>(())
        }
        .await;
        finish(client, result).await?;
        tracing::info!(migration_version = unit.version, "Reverted migration");
        reverted.push(unit.version);
    }
    Ok(reverted)
}
