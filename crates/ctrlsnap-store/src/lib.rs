//! ctrlsnap Store - schema lifecycle and transactional snapshot import
//!
//! Provides:
//! - `ConnectionDescriptor` parsing and the closed `Database` provider union
//! - Per-provider migration catalogs, runners and the lifecycle guard
//! - Table maps projecting elements into hashed rows (`ImportPlan`)
//! - Atomic snapshot import with the configured `SnapshotAction`

pub mod connection;
pub mod database;
pub mod errors;
pub mod import;
pub mod lifecycle;
pub mod migrations;
pub mod sqlite;
pub mod sqlserver;
pub mod table_map;

// Re-export key types
pub use connection::{ConnectionDescriptor, Credentials, Provider};
pub use database::Database;
pub use errors::Result;
pub use import::{ImportOptions, ImportOutcome, ImportPlan};
pub use lifecycle::DatabaseStatus;
pub use migrations::{Catalog, MigrationUnit, SchemaState};
pub use table_map::{table_maps, TableMap};
