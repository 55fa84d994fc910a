//! Embedded migration catalogs
//!
//! Scripts are embedded at compile time using include_str!. Versions are
//! `yyyymmddHHMMSS` timestamps and the two providers keep the same versions
//! for the same logical change.

use crate::connection::Provider;
use crate::migrations::MigrationUnit;

pub(crate) fn sqlite_units() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit {
            version: 20240115090000,
            description: "snapshot and element tables",
            up: include_str!("../../migrations/sqlite/20240115090000_snapshot_schema.up.sql"),
            down: Some(include_str!(
                "../../migrations/sqlite/20240115090000_snapshot_schema.down.sql"
            )),
        },
        MigrationUnit {
            version: 20240212143000,
            description: "add-on instructions and parameters",
            up: include_str!("../../migrations/sqlite/20240212143000_aoi_parameters.up.sql"),
            down: Some(include_str!(
                "../../migrations/sqlite/20240212143000_aoi_parameters.down.sql"
            )),
        },
        MigrationUnit {
            version: 20240520101500,
            description: "snapshot supersession",
            up: include_str!("../../migrations/sqlite/20240520101500_snapshot_superseded_by.up.sql"),
            down: Some(include_str!(
                "../../migrations/sqlite/20240520101500_snapshot_superseded_by.down.sql"
            )),
        },
    ]
}

pub(crate) fn sqlserver_units() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit {
            version: 20240115090000,
            description: "snapshot and element tables",
            up: include_str!("../../migrations/sqlserver/20240115090000_snapshot_schema.up.sql"),
            down: Some(include_str!(
                "../../migrations/sqlserver/20240115090000_snapshot_schema.down.sql"
            )),
        },
        MigrationUnit {
            version: 20240212143000,
            description: "add-on instructions and parameters",
            up: include_str!("../../migrations/sqlserver/20240212143000_aoi_parameters.up.sql"),
            down: Some(include_str!(
                "../../migrations/sqlserver/20240212143000_aoi_parameters.down.sql"
            )),
        },
        MigrationUnit {
            version: 20240520101500,
            description: "snapshot supersession",
            up: include_str!(
                "../../migrations/sqlserver/20240520101500_snapshot_superseded_by.up.sql"
            ),
            down: Some(include_str!(
                "../../migrations/sqlserver/20240520101500_snapshot_superseded_by.down.sql"
            )),
        },
    ]
}

pub(crate) fn units_for(provider: Provider) -> Vec<MigrationUnit> {
    match provider {
        Provider::Sqlite => sqlite_units(),
        Provider::SqlServer => sqlserver_units(),
    }
}
