//! Error helpers for ctrlsnap-store
//!
//! Builds `ExError`s for storage-layer failures

use ctrlsnap_core::errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Provider)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Create a database error from tiberius::error::Error
pub fn from_tiberius(err: tiberius::error::Error) -> ExError {
    ExError::new(ExErrorKind::Provider)
        .with_op("sqlserver")
        .with_message(err.to_string())
}

/// Create a migration script failure
pub fn migration_error(version: i64, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Provider)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", version, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(version: i64, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::ChecksumMismatch)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: catalog has {}, database recorded {}",
            version, expected, actual
        ))
}

/// Create a migration-required error for a data operation
pub fn migration_required(op: &str, data_source: &str, reason: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::MigrationRequired)
        .with_op(op.to_string())
        .with_data_source(data_source.to_string())
        .with_message(reason)
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::from(err).with_op(operation.to_string())
}

/// Create an error for a blocking task that did not finish
pub fn join_error(operation: &str, err: tokio::task::JoinError) -> ExError {
    ExError::new(ExErrorKind::Internal)
        .with_op(operation.to_string())
        .with_message(format!("blocking task failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_required_names_data_source() {
        let err = migration_required("import", "plant.db", "1 pending migration");
        assert_eq!(err.kind(), ExErrorKind::MigrationRequired);
        assert_eq!(err.data_source(), Some("plant.db"));
    }

    #[test]
    fn test_io_error_keeps_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = io_error("read_source", io);
        assert_eq!(err.kind(), ExErrorKind::NotFound);
        assert_eq!(err.op(), Some("read_source"));
    }
}
