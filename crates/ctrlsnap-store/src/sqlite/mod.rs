//! SQLite backend
//!
//! rusqlite is synchronous, so every operation opens its own connection on
//! the blocking pool. No connection is shared between operations.

mod session;

use ctrlsnap_core::diff::KeyedHash;
use ctrlsnap_core::hashing::Digest;
use ctrlsnap_core::model::{SnapshotSummary, TargetKey};
use rusqlite::{Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{from_rusqlite, join_error, migration_required, Result};
use crate::import::{ImportOptions, ImportOutcome, ImportPlan};
use crate::migrations::{sqlite as runner, Catalog, SchemaState};
use crate::table_map::TableMap;

pub use session::SqliteSession;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a database file, creating it if absent
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path).map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Open an existing database file; `None` when the file does not exist
pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Option<Connection>> {
    if !path.as_ref().exists() {
        return Ok(None);
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(Some(conn))
}

/// Per-connection settings: cascades need foreign keys on
pub fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(from_rusqlite)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .map_err(from_rusqlite)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(from_rusqlite)?;
    Ok(())
}

/// A SQLite database file plus the catalog governing it
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    path: PathBuf,
    catalog: Catalog,
}

impl SqliteDatabase {
    pub fn new(path: impl Into<PathBuf>, catalog: Catalog) -> Self {
        Self {
            path: path.into(),
            catalog,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn data_source(&self) -> String {
        self.path.display().to_string()
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf, Catalog, String) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let catalog = self.catalog.clone();
        let data_source = self.data_source();
        tokio::task::spawn_blocking(move || {
            f(path, catalog, data_source.clone()).map_err(|e| {
                if e.data_source().is_some() {
                    e
                } else {
                    e.with_data_source(data_source)
                }
            })
        })
        .await
        .map_err(|e| join_error(op, e))?
    }

    pub async fn build(&self) -> Result<Vec<i64>> {
        self.blocking("build", |path, catalog, data_source| {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| crate::errors::io_error("build", e))?;
            }
            let mut conn = open(&path)?;
            runner::build(&mut conn, &catalog, &data_source)
        })
        .await
    }

    pub async fn migrate(&self) -> Result<Vec<i64>> {
        self.blocking("migrate", |path, catalog, _| {
            let mut conn = open(&path)?;
            runner::migrate(&mut conn, &catalog)
        })
        .await
    }

    pub async fn revert(&self, to_version: i64) -> Result<Vec<i64>> {
        self.blocking("revert", move |path, catalog, data_source| {
            let mut conn = open_existing(&path)?.ok_or_else(|| {
                migration_required("revert", &data_source, "database has not been built")
            })?;
            runner::revert(&mut conn, &catalog, to_version)
        })
        .await
    }

    pub async fn schema_state(&self) -> Result<Option<SchemaState>> {
        self.blocking("schema_state", |path, _, _| match open_existing(&path)? {
            Some(conn) => runner::read_state(&conn),
            None => Ok(None),
        })
        .await
    }

    pub async fn import(&self, plan: ImportPlan, options: ImportOptions) -> Result<ImportOutcome> {
        self.blocking("import", move |path, catalog, data_source| {
            let mut conn = open_existing(&path)?.ok_or_else(|| {
                migration_required("import", &data_source, "database has not been built")
            })?;
            import_blocking(&mut conn, &catalog, &data_source, &plan, options)
        })
        .await
    }

    pub async fn current_snapshot(&self, target: &TargetKey) -> Result<Option<SnapshotSummary>> {
        let target = target.clone();
        self.blocking("current_snapshot", move |path, catalog, data_source| {
            let conn = require_current(&path, &catalog, &data_source, "current_snapshot")?;
            session::current_snapshot(&conn, &target)
        })
        .await
    }

    pub async fn snapshots(&self, target: &TargetKey) -> Result<Vec<SnapshotSummary>> {
        let target = target.clone();
        self.blocking("snapshots", move |path, catalog, data_source| {
            let conn = require_current(&path, &catalog, &data_source, "snapshots")?;
            let sql = format!(
                "SELECT {} FROM snapshot WHERE target_type = ?1 AND target_name = ?2
                 ORDER BY snapshot_id",
                session::SUMMARY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
            let raw = stmt
                .query_map(
                    rusqlite::params![target.target_type, target.target_name],
                    session::raw_summary,
                )
                .map_err(from_rusqlite)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(from_rusqlite)?;
            raw.into_iter().map(|r| r.into_summary()).collect()
        })
        .await
    }

    pub async fn record_keys(
        &self,
        map: &'static TableMap,
        snapshot_id: i64,
    ) -> Result<Vec<KeyedHash>> {
        self.blocking("record_keys", move |path, catalog, data_source| {
            let conn = require_current(&path, &catalog, &data_source, "record_keys")?;
            let keys: Vec<String> = map.natural_key.iter().map(|k| session::quote(k)).collect();
            let sql = format!(
                "SELECT {}, record_hash FROM {} WHERE snapshot_id = ?1 ORDER BY {}",
                keys.join(", "),
                session::quote(map.table),
                keys.join(", ")
            );
            let key_len = keys.len();
            let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
            let rows = stmt
                .query_map([snapshot_id], |row| {
                    let parts = (0..key_len)
                        .map(|i| row.get::<_, String>(i))
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    let hash: Vec<u8> = row.get(key_len)?;
                    Ok((parts.join("/"), hash))
                })
                .map_err(from_rusqlite)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(from_rusqlite)?;
            rows.into_iter()
                .map(|(key, hash)| Ok(KeyedHash::new(key, Digest::from_slice(&hash)?)))
                .collect()
        })
        .await
    }
}

fn require_current(
    path: &Path,
    catalog: &Catalog,
    data_source: &str,
    op: &str,
) -> Result<Connection> {
    let Some(conn) = open_existing(path)? else {
        return Err(migration_required(op, data_source, "database has not been built"));
    };
    let state = runner::read_state(&conn)?;
    crate::lifecycle::DatabaseStatus::from_state(state.as_ref(), catalog)
        .require_current(op, data_source)?;
    Ok(conn)
}

/// The import unit of work: guard, optional short-circuit, snapshot,
/// element tables, retention policy, commit.
fn import_blocking(
    conn: &mut Connection,
    catalog: &Catalog,
    data_source: &str,
    plan: &ImportPlan,
    options: ImportOptions,
) -> Result<ImportOutcome> {
    let target = plan.target();
    let session = SqliteSession::begin(conn)?;
    session.ensure_current(catalog, data_source)?;

    if options.skip_unchanged {
        if let Some(current) = session.current_snapshot(&target)? {
            if current.source_hash == plan.header.source_hash {
                tracing::info!(
                    snapshot_id = current.snapshot_id,
                    target = %target,
                    "Source unchanged since current snapshot, skipping import"
                );
                return Ok(ImportOutcome::Unchanged {
                    snapshot_id: current.snapshot_id,
                });
            }
        }
    }

    let snapshot_id = session.insert_snapshot(&plan.header)?;
    let mut rows = BTreeMap::new();
    for table in &plan.tables {
        let written = session.insert_rows(snapshot_id, table)?;
        rows.insert(table.map.table.to_string(), written);
    }
    let superseded = session.apply_action(options.action, &target, snapshot_id)?;
    session.commit()?;

    Ok(ImportOutcome::Imported {
        snapshot_id,
        rows,
        superseded,
    })
}
