//! SQLite import session
//!
//! One connection, one `BEGIN IMMEDIATE` transaction. Dropping the session
//! without `commit` rolls everything back.

use chrono::{DateTime, Utc};
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::hashing::Digest;
use ctrlsnap_core::model::{SnapshotSummary, TargetKey};
use ctrlsnap_core::{SnapshotAction, SnapshotHeader, Value};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::iter::once;

use crate::errors::{from_rusqlite, Result};
use crate::import::PlannedTable;
use crate::lifecycle::DatabaseStatus;
use crate::migrations::{sqlite as runner, Catalog};
use crate::table_map::TableMap;

pub(crate) const SUMMARY_COLUMNS: &str =
    "snapshot_id, target_type, target_name, import_date, source_hash, superseded_by";

pub struct SqliteSession<'c> {
    tx: Transaction<'c>,
}

impl<'c> SqliteSession<'c> {
    /// Open the write transaction, taking the database write lock up front
    pub fn begin(conn: &'c mut Connection) -> Result<Self> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(from_rusqlite)?;
        Ok(Self { tx })
    }

    /// Lifecycle guard evaluated inside the write transaction
    pub fn ensure_current(&self, catalog: &Catalog, data_source: &str) -> Result<()> {
        let state = runner::read_state(&self.tx)?;
        DatabaseStatus::from_state(state.as_ref(), catalog).require_current("import", data_source)
    }

    pub fn current_snapshot(&self, target: &TargetKey) -> Result<Option<SnapshotSummary>> {
        current_snapshot(&self.tx, target)
    }

    /// Insert the snapshot row; `import_date` is the time of this insert.
    pub fn insert_snapshot(&self, header: &SnapshotHeader) -> Result<i64> {
        let import_date = Utc::now();
        self.tx
            .execute(
                "INSERT INTO snapshot (target_type, target_name, is_partial, schema_revision,
                    software_revision, export_date, export_options, import_date, import_user,
                    import_machine, source_hash, source_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    header.target_type,
                    header.target_name,
                    header.is_partial,
                    header.schema_revision,
                    header.software_revision,
                    header.export_date.map(|d| d.to_rfc3339()),
                    header.export_options,
                    import_date.to_rfc3339(),
                    header.import_user,
                    header.import_machine,
                    &header.source_hash.as_bytes()[..],
                    header.source_data.as_deref(),
                ],
            )
            .map_err(from_rusqlite)?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Write every planned row of one table through a cached statement
    pub fn insert_rows(&self, snapshot_id: i64, table: &PlannedTable) -> Result<usize> {
        if table.rows.is_empty() {
            return Ok(0);
        }
        let sql = insert_sql(table.map);
        let mut stmt = self.tx.prepare_cached(&sql).map_err(from_rusqlite)?;
        for row in &table.rows {
            let params = once(ToSqlOutput::Owned(SqlValue::Integer(snapshot_id)))
                .chain(row.values.iter().map(bind))
                .chain(once(ToSqlOutput::Borrowed(ValueRef::Blob(
                    row.record_hash.as_bytes(),
                ))));
            stmt.execute(params_from_iter(params))
                .map_err(|e| from_rusqlite(e).with_op(format!("insert_{}", table.map.table)))?;
        }
        Ok(table.rows.len())
    }

    /// Retire prior snapshots of `target` once the new one is in place
    pub fn apply_action(
        &self,
        action: SnapshotAction,
        target: &TargetKey,
        snapshot_id: i64,
    ) -> Result<usize> {
        let sql = match action {
            SnapshotAction::Append => return Ok(0),
            SnapshotAction::ReplaceLatest => {
                "DELETE FROM snapshot
                 WHERE target_type = ?1 AND target_name = ?2 AND snapshot_id <> ?3"
            }
            SnapshotAction::Supersede => {
                "UPDATE snapshot SET superseded_by = ?3
                 WHERE target_type = ?1 AND target_name = ?2 AND snapshot_id <> ?3
                   AND superseded_by IS NULL"
            }
        };
        self.tx
            .execute(sql, params![target.target_type, target.target_name, snapshot_id])
            .map_err(from_rusqlite)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit().map_err(from_rusqlite)
    }
}

fn bind(value: &Value) -> ToSqlOutput<'_> {
    match value {
        Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
        Value::Bool(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
        Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
        Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
    }
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn insert_sql(map: &TableMap) -> String {
    let columns: Vec<String> = once("snapshot_id")
        .chain(map.column_names())
        .chain(once("record_hash"))
        .map(quote)
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(map.table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

pub(crate) fn current_snapshot(
    conn: &Connection,
    target: &TargetKey,
) -> Result<Option<SnapshotSummary>> {
    let sql = format!(
        "SELECT {} FROM snapshot
         WHERE target_type = ?1 AND target_name = ?2 AND superseded_by IS NULL
         ORDER BY snapshot_id DESC LIMIT 1",
        SUMMARY_COLUMNS
    );
    let raw = conn
        .query_row(&sql, params![target.target_type, target.target_name], raw_summary)
        .optional()
        .map_err(from_rusqlite)?;
    raw.map(RawSummary::into_summary).transpose()
}

pub(crate) struct RawSummary {
    snapshot_id: i64,
    target_type: String,
    target_name: String,
    import_date: String,
    source_hash: Vec<u8>,
    superseded_by: Option<i64>,
}

pub(crate) fn raw_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSummary> {
    Ok(RawSummary {
        snapshot_id: row.get(0)?,
        target_type: row.get(1)?,
        target_name: row.get(2)?,
        import_date: row.get(3)?,
        source_hash: row.get(4)?,
        superseded_by: row.get(5)?,
    })
}

impl RawSummary {
    pub(crate) fn into_summary(self) -> Result<SnapshotSummary> {
        let import_date = DateTime::parse_from_rfc3339(&self.import_date)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| {
                ExError::new(ExErrorKind::Serialization)
                    .with_op("read_snapshot")
                    .with_message(format!("invalid import_date '{}': {}", self.import_date, e))
            })?;
        Ok(SnapshotSummary {
            snapshot_id: self.snapshot_id,
            target_type: self.target_type,
            target_name: self.target_name,
            import_date,
            source_hash: Digest::from_slice(&self.source_hash)?,
            superseded_by: self.superseded_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_map::table_map;

    #[test]
    fn test_insert_sql_numbers_every_column() {
        let sql = insert_sql(table_map("aoi").unwrap());
        assert_eq!(
            sql,
            "INSERT INTO \"aoi\" (\"snapshot_id\", \"name\", \"revision\", \"vendor\", \
             \"execute_prescan\", \"execute_postscan\", \"description\", \"record_hash\") \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        );
    }

    #[test]
    fn test_quote_escapes_embedded_quotes() {
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }
}
