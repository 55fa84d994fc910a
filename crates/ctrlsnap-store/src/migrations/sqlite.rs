//! SQLite migration runner
//!
//! Applies catalog units with checksums, one transaction per unit

use chrono::{DateTime, Utc};
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::{log_op_end, log_op_error, log_op_start};
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Instant;

use crate::errors::{from_rusqlite, migration_error, migration_required, Result};
use crate::migrations::{AppliedMigration, Catalog, MigrationUnit, SchemaState, HISTORY_TABLE};

const CREATE_HISTORY: &str = "CREATE TABLE IF NOT EXISTS __migration_history (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

pub fn history_exists(conn: &Connection) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [HISTORY_TABLE],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(from_rusqlite)
}

fn user_table_count(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )
    .map_err(from_rusqlite)
}

/// Read the history table; `None` when the database was never built
pub fn read_state(conn: &Connection) -> Result<Option<SchemaState>> {
    if !history_exists(conn)? {
        return Ok(None);
    }

    let mut stmt = conn
        .prepare(
            "SELECT version, description, checksum, applied_at
             FROM __migration_history ORDER BY version",
        )
        .map_err(from_rusqlite)?;
    let rows: Vec<(i64, String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;

    let applied = rows
        .into_iter()
        .map(|(version, description, checksum, applied_at)| {
            Ok(AppliedMigration {
                version,
                description,
                checksum,
                applied_at: parse_timestamp(&applied_at)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(SchemaState { applied }))
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ExError::new(ExErrorKind::Serialization)
                .with_op("read_migration_history")
                .with_message(format!("invalid applied_at '{}': {}", text, e))
        })
}

fn record_unit(conn: &Connection, unit: &MigrationUnit) -> Result<()> {
    conn.execute(
        "INSERT INTO __migration_history (version, description, checksum, applied_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            unit.version,
            unit.description,
            unit.checksum(),
            Utc::now().to_rfc3339()
        ],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

/// Initialize a fresh database with the full catalog in one transaction.
///
/// A database that already has history is left alone when current.
///
/// # Errors
///
/// - `MigrationRequired` if the database has history with pending units
///   (use `migrate`)
/// - `InvalidInput` if the database has tables but no history
/// - `Provider` if a script fails; nothing is kept
pub fn build(conn: &mut Connection, catalog: &Catalog, data_source: &str) -> Result<Vec<i64>> {
    if let Some(state) = read_state(conn)? {
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

    if user_table_count(conn)? > 0 {
        return Err(ExError::new(ExErrorKind::InvalidInput)
            .with_op("build")
            .with_data_source(data_source.to_string())
            .with_message("database has tables but no migration history; refusing to build"));
    }

    let tx = conn.transaction().map_err(from_rusqlite)?;
    tx.execute_batch(CREATE_HISTORY).map_err(from_rusqlite)?;
    let mut applied = Vec::with_capacity(catalog.units().len());
    for unit in catalog.units() {
        tx.execute_batch(unit.up)
            .map_err(|e| migration_error(unit.version, &e.to_string()))?;
        record_unit(&tx, unit)?;
        applied.push(unit.version);
    }
    tx.commit().map_err(from_rusqlite)?;

    Ok(applied)
}

/// Apply all pending units in ascending order, one transaction each.
///
/// Stops at the first failing unit; earlier units stay applied.
///
/// # Errors
///
/// - `ChecksumMismatch` if applied history disagrees with the catalog
/// - `Provider` for the first failing unit
pub fn migrate(conn: &mut Connection, catalog: &Catalog) -> Result<Vec<i64>> {
    conn.execute_batch(CREATE_HISTORY).map_err(from_rusqlite)?;
    let state = read_state(conn)?.unwrap_or_default();
    state.verify(catalog)?;

    let mut applied = Vec::new();
    for unit in state.pending(catalog) {
        apply_unit(conn, unit)?;
        applied.push(unit.version);
    }
    Ok(applied)
}

fn apply_unit(conn: &mut Connection, unit: &MigrationUnit) -> Result<()> {
    let start = Instant::now();
    log_op_start!("apply_migration", migration_version = unit.version);

    let result = (|| {
        let tx = conn.transaction().map_err(from_rusqlite)?;
        tx.execute_batch(unit.up)
            .map_err(|e| migration_error(unit.version, &e.to_string()))?;
        record_unit(&tx, unit)?;
        tx.commit().map_err(from_rusqlite)
    })();

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => log_op_end!(
            "apply_migration",
            duration_ms = duration_ms,
            migration_version = unit.version
        ),
        Err(e) => log_op_error!(
            "apply_migration",
            e.clone(),
            duration_ms = duration_ms,
            migration_version = unit.version
        ),
    }
    result
}

/// Revert applied units above `to_version`, newest first.
///
/// # Errors
///
/// - `InvalidInput` if any unit to revert has no down script (checked
///   before anything is reverted)
/// - `ChecksumMismatch` if applied history disagrees with the catalog
/// - `Provider` for the first failing unit
pub fn revert(conn: &mut Connection, catalog: &Catalog, to_version: i64) -> Result<Vec<i64>> {
    let state = read_state(conn)?.unwrap_or_default();
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
        let down = unit.down.unwrap_or_default();
        let tx = conn.transaction().map_err(from_rusqlite)?;
        tx.execute_batch(down)
            .map_err(|e| migration_error(unit.version, &e.to_string()))?;
        tx.execute(
            "DELETE FROM __migration_history WHERE version = ?1",
            [unit.version],
        )
        .map_err(from_rusqlite)?;
        tx.commit().map_err(from_rusqlite)?;
        tracing::info!(migration_version = unit.version, "Reverted migration");
        reverted.push(unit.version);
    }
    Ok(reverted)
}
