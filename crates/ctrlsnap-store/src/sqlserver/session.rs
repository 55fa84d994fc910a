//! SQL Server import session
//!
//! One client, one explicit transaction opened with `XACT_ABORT ON`. Any
//! error path rolls back explicitly before the error is returned.

use chrono::{NaiveDateTime, Utc};
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::hashing::Digest;
use ctrlsnap_core::model::{SnapshotSummary, TargetKey};
use ctrlsnap_core::{SnapshotAction, SnapshotHeader, Value};
use std::borrow::Cow;
use std::iter::once;
use tiberius::{ColumnData, Row, ToSql};

use crate::errors::{from_tiberius, Result};
use crate::import::{PlannedRow, PlannedTable};
use crate::lifecycle::DatabaseStatus;
use crate::migrations::{sqlserver as runner, Catalog};
use crate::sqlserver::{batch, finish, rollback, SqlClient};
use crate::table_map::{ColumnType, TableMap};

/// SQL Server refuses more than 2100 parameters per request
pub const MAX_PARAMS_PER_BATCH: usize = 2000;
/// Row value constructor limit of `INSERT ... VALUES`
pub const MAX_ROWS_PER_BATCH: usize = 1000;

pub(crate) const SUMMARY_COLUMNS: &str =
    "snapshot_id, target_type, target_name, import_date, source_hash, superseded_by";

/// Owned-or-borrowed parameter with an explicit SQL type, so NULLs bind typed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlParam<'a> {
    Text(Option<&'a str>),
    Int(Option<i64>),
    Bit(Option<bool>),
    Binary(Option<&'a [u8]>),
    DateTime(Option<NaiveDateTime>),
}

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlParam::Text(v) => ColumnData::String(v.map(Cow::Borrowed)),
            SqlParam::Int(v) => ColumnData::I64(*v),
            SqlParam::Bit(v) => ColumnData::Bit(*v),
            SqlParam::Binary(v) => ColumnData::Binary(v.map(Cow::Borrowed)),
            SqlParam::DateTime(Some(dt)) => dt.to_sql(),
            SqlParam::DateTime(None) => ColumnData::DateTime2(None),
        }
    }
}

pub(crate) fn param(value: &Value, ty: ColumnType) -> SqlParam<'_> {
    match (value, ty) {
        (Value::Null, ColumnType::Text) => SqlParam::Text(None),
        (Value::Null, ColumnType::Integer) => SqlParam::Int(None),
        (Value::Null, ColumnType::Bool) => SqlParam::Bit(None),
        (Value::Bool(b), _) => SqlParam::Bit(Some(*b)),
        (Value::Integer(i), _) => SqlParam::Int(Some(*i)),
        (Value::Text(s), _) => SqlParam::Text(Some(s)),
        (Value::Bytes(b), _) => SqlParam::Binary(Some(b)),
    }
}

pub(crate) fn as_refs<'p>(params: &'p [SqlParam<'_>]) -> Vec<&'p dyn ToSql> {
    params.iter().map(|p| p as &dyn ToSql).collect()
}

pub(crate) fn quote(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

/// Rows per multi-row insert for a table with `params_per_row` parameters
pub fn rows_per_batch(params_per_row: usize) -> usize {
    (MAX_PARAMS_PER_BATCH / params_per_row.max(1)).clamp(1, MAX_ROWS_PER_BATCH)
}

/// `INSERT ... VALUES (@P1, ..), (..)` for `row_count` rows of `map`
pub fn insert_batch_sql(map: &TableMap, row_count: usize) -> String {
    let columns: Vec<String> = once("snapshot_id")
        .chain(map.column_names())
        .chain(once("record_hash"))
        .map(quote)
        .collect();
    let width = columns.len();
    let tuples: Vec<String> = (0..row_count)
        .map(|r| {
            let placeholders: Vec<String> =
                (1..=width).map(|c| format!("@P{}", r * width + c)).collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO [dbo].{} ({}) VALUES {}",
        quote(map.table),
        columns.join(", "),
        tuples.join(", ")
    )
}

fn row_params<'r>(map: &TableMap, snapshot_id: i64, row: &'r PlannedRow) -> Vec<SqlParam<'r>> {
    once(SqlParam::Int(Some(snapshot_id)))
        .chain(row.values.iter().zip(map.columns).map(|(v, c)| param(v, c.ty)))
        .chain(once(SqlParam::Binary(Some(&row.record_hash.as_bytes()[..]))))
        .collect()
}

fn missing(column: &str) -> ExError {
    ExError::new(ExErrorKind::Provider)
        .with_op("sqlserver_read")
        .with_message(format!("column '{}' was unexpectedly NULL", column))
}

pub(crate) fn summary_from_row(row: &Row) -> Result<SnapshotSummary> {
    let snapshot_id: i64 = row
        .try_get(0)
        .map_err(from_tiberius)?
        .ok_or_else(|| missing("snapshot_id"))?;
    let target_type: &str = row
        .try_get(1)
        .map_err(from_tiberius)?
        .ok_or_else(|| missing("target_type"))?;
    let target_name: &str = row
        .try_get(2)
        .map_err(from_tiberius)?
        .ok_or_else(|| missing("target_name"))?;
    let import_date: NaiveDateTime = row
        .try_get(3)
        .map_err(from_tiberius)?
        .ok_or_else(|| missing("import_date"))?;
    let source_hash: &[u8] = row
        .try_get(4)
        .map_err(from_tiberius)?
        .ok_or_else(|| missing("source_hash"))?;
    let superseded_by: Option<i64> = row.try_get(5).map_err(from_tiberius)?;

    Ok(SnapshotSummary {
        snapshot_id,
        target_type: target_type.to_string(),
        target_name: target_name.to_string(),
        import_date: import_date.and_utc(),
        source_hash: Digest::from_slice(source_hash)?,
        superseded_by,
    })
}

pub(crate) async fn current_snapshot(
    client: &mut SqlClient,
    target: &TargetKey,
) -> Result<Option<SnapshotSummary>> {
    let sql = format!(
        "SELECT TOP (1) {} FROM [dbo].[snapshot]
         WHERE target_type = @P1 AND target_name = @P2 AND superseded_by IS NULL
         ORDER BY snapshot_id DESC",
        SUMMARY_COLUMNS
    );
    let params = [
        SqlParam::Text(Some(&target.target_type)),
        SqlParam::Text(Some(&target.target_name)),
    ];
    let row = client
        .query(sql, &as_refs(&params))
        .await
        .map_err(from_tiberius)?
        .into_row()
        .await
        .map_err(from_tiberius)?;
    row.as_ref().map(summary_from_row).transpose()
}

pub struct SqlServerSession<'c> {
    client: &'c mut SqlClient,
}

impl<'c> SqlServerSession<'c> {
    pub async fn begin(client: &'c mut SqlClient) -> Result<SqlServerSession<'c>> {
        batch(client, "SET XACT_ABORT ON; BEGIN TRANSACTION").await?;
        Ok(Self { client })
    }

    pub async fn ensure_current(&mut self, catalog: &Catalog, data_source: &str) -> Result<()> {
        let state = runner::read_state(self.client).await?;
        DatabaseStatus::from_state(state.as_ref(), catalog).require_current("import", data_source)
    }

    pub async fn current_snapshot(&mut self, target: &TargetKey) -> Result<Option<SnapshotSummary>> {
        current_snapshot(self.client, target).await
    }

    /// Insert the snapshot row; `import_date` is the time of this insert.
    pub async fn insert_snapshot(&mut self, header: &SnapshotHeader) -> Result<i64> {
        let import_date = Utc::now().naive_utc();
        let params = [
            SqlParam::Text(Some(&header.target_type)),
            SqlParam::Text(Some(&header.target_name)),
            SqlParam::Bit(Some(header.is_partial)),
            SqlParam::Text(header.schema_revision.as_deref()),
            SqlParam::Text(header.software_revision.as_deref()),
            SqlParam::DateTime(header.export_date.map(|d| d.naive_utc())),
            SqlParam::Text(header.export_options.as_deref()),
            SqlParam::DateTime(Some(import_date)),
            SqlParam::Text(Some(&header.import_user)),
            SqlParam::Text(Some(&header.import_machine)),
            SqlParam::Binary(Some(&header.source_hash.as_bytes()[..])),
            SqlParam::Binary(header.source_data.as_deref()),
        ];
        let row = self
            .client
            .query(
                "INSERT INTO [dbo].[snapshot] (target_type, target_name, is_partial,
                    schema_revision, software_revision, export_date, export_options,
                    import_date, import_user, import_machine, source_hash, source_data)
                 OUTPUT INSERTED.snapshot_id
                 VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9, @P10, @P11, @P12)",
                &as_refs(&params),
            )
            .await
            .map_err(from_tiberius)?
            .into_row()
            .await
            .map_err(from_tiberius)?
            .ok_or_else(|| missing("snapshot_id"))?;
        row.try_get::<i64, _>(0)
            .map_err(from_tiberius)?
            .ok_or_else(|| missing("snapshot_id"))
    }

    /// Write every planned row of one table in multi-row batches
    pub async fn insert_rows(&mut self, snapshot_id: i64, table: &PlannedTable) -> Result<usize> {
        let per_row = table.map.columns.len() + 2;
        let chunk = rows_per_batch(per_row);
        for rows in table.rows.chunks(chunk) {
            let sql = insert_batch_sql(table.map, rows.len());
            let params: Vec<SqlParam<'_>> = rows
                .iter()
                .flat_map(|row| row_params(table.map, snapshot_id, row))
                .collect();
            self.client
                .execute(sql, &as_refs(&params))
                .await
                .map_err(|e| from_tiberius(e).with_op(format!("insert_{}", table.map.table)))?;
        }
        Ok(table.rows.len())
    }

    pub async fn apply_action(
        &mut self,
        action: SnapshotAction,
        target: &TargetKey,
        snapshot_id: i64,
    ) -> Result<usize> {
        let sql = match action {
            SnapshotAction::Append => return Ok(0),
            SnapshotAction::ReplaceLatest => {
                "DELETE FROM [dbo].[snapshot]
                 WHERE target_type = @P1 AND target_name = @P2 AND snapshot_id <> @P3"
            }
            SnapshotAction::Supersede => {
                "UPDATE [dbo].[snapshot] SET superseded_by = @P3
                 WHERE target_type = @P1 AND target_name = @P2 AND snapshot_id <> @P3
                   AND superseded_by IS NULL"
            }
        };
        let params = [
            SqlParam::Text(Some(&target.target_type)),
            SqlParam::Text(Some(&target.target_name)),
            SqlParam::Int(Some(snapshot_id)),
        ];
        let result = self
            .client
            .execute(sql, &as_refs(&params))
            .await
            .map_err(from_tiberius)?;
        Ok(result.total() as usize)
    }

    /// Commit; a failed commit is rolled back before the error returns
    pub async fn commit(self) -> Result<()> {
        finish(self.client, Ok(())).await
    }

    pub async fn rollback(self) {
        rollback(self.client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_map::table_map;

    #[test]
    fn test_rows_per_batch_respects_both_limits() {
        // tag: 11 mapped columns + snapshot_id + record_hash
        assert_eq!(rows_per_batch(13), 153);
        assert_eq!(rows_per_batch(1), MAX_ROWS_PER_BATCH);
        assert_eq!(rows_per_batch(5000), 1);
        for width in 1..200 {
            let rows = rows_per_batch(width);
            assert!(rows * width <= MAX_PARAMS_PER_BATCH || rows == 1);
        }
    }

    #[test]
    fn test_insert_batch_sql_numbers_placeholders_across_rows() {
        let sql = insert_batch_sql(table_map("controller").unwrap(), 2);
        assert!(sql.starts_with(
            "INSERT INTO [dbo].[controller] ([snapshot_id], [name], [processor_type]"
        ));
        // 7 mapped columns + 2 per row
        assert!(sql.contains("(@P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9)"));
        assert!(sql.ends_with("(@P10, @P11, @P12, @P13, @P14, @P15, @P16, @P17, @P18)"));
    }

    #[test]
    fn test_nulls_bind_with_column_type() {
        assert_eq!(param(&Value::Null, ColumnType::Integer), SqlParam::Int(None));
        assert_eq!(param(&Value::Null, ColumnType::Bool), SqlParam::Bit(None));
        assert_eq!(param(&Value::Null, ColumnType::Text), SqlParam::Text(None));
        assert_eq!(param(&Value::from("x"), ColumnType::Text), SqlParam::Text(Some("x")));
    }

    #[test]
    fn test_quote_escapes_closing_bracket() {
        assert_eq!(quote("a]b"), "[a]]b]");
    }
}
