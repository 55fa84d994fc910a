//! SQL Server backend
//!
//! Each operation opens its own TDS connection with tiberius over a tokio
//! `TcpStream`; a connection is never shared between concurrent imports.

pub mod session;

use ctrlsnap_core::diff::KeyedHash;
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::hashing::Digest;
use ctrlsnap_core::model::{SnapshotSummary, TargetKey};
use std::collections::BTreeMap;
use std::future::Future;
use tiberius::{AuthMethod, Client, Config, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::connection::ConnectionDescriptor;
use crate::errors::{from_tiberius, io_error, migration_required, Result};
use crate::import::{ImportOptions, ImportOutcome, ImportPlan};
use crate::lifecycle::DatabaseStatus;
use crate::migrations::{sqlserver as runner, Catalog, SchemaState};
use crate::table_map::TableMap;

use session::{as_refs, quote, SqlParam};

pub use session::SqlServerSession;

pub type SqlClient = Client<Compat<TcpStream>>;

/// Run a batch that returns no rows of interest
pub(crate) async fn batch(client: &mut SqlClient, sql: &str) -> Result<()> {
    client
        .simple_query(sql)
        .await
        .map_err(from_tiberius)?
        .into_results()
        .await
        .map_err(from_tiberius)?;
    Ok(())
}

pub(crate) async fn scalar_i32(
    client: &mut SqlClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<i32> {
    let row = client
        .query(sql, params)
        .await
        .map_err(from_tiberius)?
        .into_row()
        .await
        .map_err(from_tiberius)?;
    Ok(row
        .and_then(|r| r.try_get::<i32, _>(0).ok().flatten())
        .unwrap_or_default())
}

pub(crate) async fn begin(client: &mut SqlClient) -> Result<()> {
    batch(client, "SET XACT_ABORT ON; BEGIN TRANSACTION").await
}

/// Anything that can run a plain T-SQL batch inside an open transaction
pub(crate) trait BatchRunner {
    fn run_batch<'a>(&'a mut self, sql: &'a str) -> impl Future<Output = Result<()>> + Send + 'a;
}

impl BatchRunner for SqlClient {
    fn run_batch<'a>(&'a mut self, sql: &'a str) -> impl Future<Output = Result<()>> + Send + 'a {
        batch(self, sql)
    }
}

/// Commit on success, roll back on failure; returns the original outcome.
///
/// A failed `COMMIT` is rolled back too, so the connection never leaves
/// with an open transaction.
pub(crate) async fn finish<T, C: BatchRunner>(client: &mut C, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            if let Err(e) = client.run_batch("COMMIT TRANSACTION").await {
                rollback(client).await;
                return Err(e);
            }
            Ok(value)
        }
        Err(e) => {
            rollback(client).await;
            Err(e)
        }
    }
}

/// Roll back if a transaction is open; failures are logged since the
/// original error matters more
pub(crate) async fn rollback<C: BatchRunner>(client: &mut C) {
    if let Err(e) = client
        .run_batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION")
        .await
    {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

/// A SQL Server database plus the catalog governing it
#[derive(Debug, Clone)]
pub struct SqlServerDatabase {
    descriptor: ConnectionDescriptor,
    database: String,
    catalog: Catalog,
}

impl SqlServerDatabase {
    /// # Errors
    ///
    /// `Configuration` when the data source names no database.
    pub fn new(descriptor: ConnectionDescriptor, catalog: Catalog) -> Result<Self> {
        let database = descriptor
            .ado_value(&["database", "initial catalog"])
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                ExError::new(ExErrorKind::Configuration)
                    .with_op("resolve")
                    .with_data_source(descriptor.data_source.clone())
                    .with_message("SQL Server data source must name a Database")
            })?;
        Ok(Self {
            descriptor,
            database,
            catalog,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn data_source(&self) -> &str {
        &self.descriptor.data_source
    }

    fn config(&self, database: &str) -> Result<Config> {
        let mut config = Config::from_ado_string(&self.descriptor.data_source).map_err(|e| {
            ExError::new(ExErrorKind::Configuration)
                .with_op("sqlserver_config")
                .with_data_source(self.data_source().to_string())
                .with_message(e.to_string())
        })?;
        if let Some(creds) = &self.descriptor.credentials {
            config.authentication(AuthMethod::sql_server(&creds.user, creds.password.expose()));
        }
        config.database(database);
        Ok(config)
    }

    async fn connect_to(&self, database: &str) -> Result<SqlClient> {
        let config = self.config(database)?;
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| io_error("sqlserver_connect", e).with_data_source(self.data_source().to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| io_error("sqlserver_connect", e))?;
        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| from_tiberius(e).with_data_source(self.data_source().to_string()))
    }

    async fn connect(&self) -> Result<SqlClient> {
        self.connect_to(&self.database).await
    }

    async fn database_exists(&self) -> Result<bool> {
        let mut master = self.connect_to("master").await?;
        let params = [SqlParam::Text(Some(&self.database))];
        let exists = scalar_i32(
            &mut master,
            "SELECT CASE WHEN DB_ID(@P1) IS NULL THEN 0 ELSE 1 END",
            &as_refs(&params),
        )
        .await?;
        Ok(exists == 1)
    }

    async fn create_database_if_missing(&self) -> Result<()> {
        let mut master = self.connect_to("master").await?;
        let params = [SqlParam::Text(Some(&self.database))];
        master
            .execute(
                "IF DB_ID(@P1) IS NULL
                 BEGIN
                     DECLARE @sql NVARCHAR(MAX) = N'CREATE DATABASE ' + QUOTENAME(@P1);
                     EXEC (@sql);
                 END",
                &as_refs(&params),
            )
            .await
            .map_err(from_tiberius)?;
        Ok(())
    }

    pub async fn build(&self) -> Result<Vec<i64>> {
        self.create_database_if_missing().await?;
        let mut client = self.connect().await?;
        runner::build(&mut client, &self.catalog, self.data_source()).await
    }

    pub async fn migrate(&self) -> Result<Vec<i64>> {
        self.create_database_if_missing().await?;
        let mut client = self.connect().await?;
        runner::migrate(&mut client, &self.catalog).await
    }

    pub async fn revert(&self, to_version: i64) -> Result<Vec<i64>> {
        if !self.database_exists().await? {
            return Err(migration_required("revert", self.data_source(), "database has not been built"));
        }
        let mut client = self.connect().await?;
        runner::revert(&mut client, &self.catalog, to_version).await
    }

    pub async fn schema_state(&self) -> Result<Option<SchemaState>> {
        if !self.database_exists().await? {
            return Ok(None);
        }
        let mut client = self.connect().await?;
        runner::read_state(&mut client).await
    }

    async fn connect_current(&self, op: &str) -> Result<SqlClient> {
        if !self.database_exists().await? {
            return Err(migration_required(op, self.data_source(), "database has not been built"));
        }
        let mut client = self.connect().await?;
        let state = runner::read_state(&mut client).await?;
        DatabaseStatus::from_state(state.as_ref(), &self.catalog).require_current(op, self.data_source())?;
        Ok(client)
    }

    /// The import unit of work: guard, optional short-circuit, snapshot,
    /// element tables, retention policy, commit.
    pub async fn import(&self, plan: ImportPlan, options: ImportOptions) -> Result<ImportOutcome> {
        if !self.database_exists().await? {
            return Err(migration_required("import", self.data_source(), "database has not been built"));
        }
        let mut client = self.connect().await?;
        let mut session = SqlServerSession::begin(&mut client).await?;
        match run_import(&mut session, &self.catalog, self.data_source(), &plan, options).await {
            Ok(ImportOutcome::Unchanged { snapshot_id }) => {
                session.rollback().await;
                Ok(ImportOutcome::Unchanged { snapshot_id })
            }
            Ok(outcome) => {
                session
                    .commit()
                    .await
                    .map_err(|e| e.with_data_source(self.data_source().to_string()))?;
                Ok(outcome)
            }
            Err(e) => {
                session.rollback().await;
                Err(e.with_data_source(self.data_source().to_string()))
            }
        }
    }

    pub async fn current_snapshot(&self, target: &TargetKey) -> Result<Option<SnapshotSummary>> {
        let mut client = self.connect_current("current_snapshot").await?;
        session::current_snapshot(&mut client, target).await
    }

    pub async fn snapshots(&self, target: &TargetKey) -> Result<Vec<SnapshotSummary>> {
        let mut client = self.connect_current("snapshots").await?;
        let sql = format!(
            "SELECT {} FROM [dbo].[snapshot] WHERE target_type = @P1 AND target_name = @P2
             ORDER BY snapshot_id",
            session::SUMMARY_COLUMNS
        );
        let params = [
            SqlParam::Text(Some(&target.target_type)),
            SqlParam::Text(Some(&target.target_name)),
        ];
        let rows = client
            .query(sql, &as_refs(&params))
            .await
            .map_err(from_tiberius)?
            .into_first_result()
            .await
            .map_err(from_tiberius)?;
        rows.iter().map(session::summary_from_row).collect()
    }

    pub async fn record_keys(&self, map: &'static TableMap, snapshot_id: i64) -> Result<Vec<KeyedHash>> {
        let mut client = self.connect_current("record_keys").await?;
        let keys: Vec<String> = map.natural_key.iter().map(|k| quote(k)).collect();
        let sql = format!(
            "SELECT {}, [record_hash] FROM [dbo].{} WHERE snapshot_id = @P1 ORDER BY {}",
            keys.join(", "),
            quote(map.table),
            keys.join(", ")
        );
        let params = [SqlParam::Int(Some(snapshot_id))];
        let rows = client
            .query(sql, &as_refs(&params))
            .await
            .map_err(from_tiberius)?
            .into_first_result()
            .await
            .map_err(from_tiberius)?;

        rows.iter()
            .map(|row| {
                let mut parts = Vec::with_capacity(keys.len());
                for i in 0..keys.len() {
                    let part: Option<&str> = row.try_get(i).map_err(from_tiberius)?;
                    parts.push(part.unwrap_or_default().to_string());
                }
                let hash: Option<&[u8]> = row.try_get(keys.len()).map_err(from_tiberius)?;
                Ok(KeyedHash::new(
                    parts.join("/"),
                    Digest::from_slice(hash.unwrap_or_default())?,
                ))
            })
            .collect()
    }
}

async fn run_import(
    session: &mut SqlServerSession<'_>,
    catalog: &Catalog,
    data_source: &str,
    plan: &ImportPlan,
    options: ImportOptions,
) -> Result<ImportOutcome> {
    let target = plan.target();
    session.ensure_current(catalog, data_source).await?;

    if options.skip_unchanged {
        if let Some(current) = session.current_snapshot(&target).await? {
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

    let snapshot_id = session.insert_snapshot(&plan.header).await?;
    let mut rows = BTreeMap::new();
    for table in &plan.tables {
        let written = session.insert_rows(snapshot_id, table).await?;
        rows.insert(table.map.table.to_string(), written);
    }
    let superseded = session.apply_action(options.action, &target, snapshot_id).await?;

    Ok(ImportOutcome::Imported {
        snapshot_id,
        rows,
        superseded,
    })
}
