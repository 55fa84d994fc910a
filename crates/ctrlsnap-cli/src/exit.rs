//! Process exit codes (sysexits.h values)

use ctrlsnap_core::errors::{ExError, ExErrorKind};

pub const USAGE: u8 = 64;
pub const DATA: u8 = 65;
pub const NO_INPUT: u8 = 66;
pub const SOFTWARE: u8 = 70;
pub const OS: u8 = 71;

pub fn code_for_kind(kind: ExErrorKind) -> u8 {
    match kind {
        ExErrorKind::InvalidInput | ExErrorKind::Configuration => USAGE,
        ExErrorKind::Format | ExErrorKind::Projection => DATA,
        ExErrorKind::NotFound => NO_INPUT,
        ExErrorKind::Provider
        | ExErrorKind::Io
        | ExErrorKind::MigrationRequired
        | ExErrorKind::ChecksumMismatch
        | ExErrorKind::QueueFull
        | ExErrorKind::QueueClosed => OS,
        ExErrorKind::Serialization | ExErrorKind::Internal => SOFTWARE,
    }
}

/// Exit code for an error surfaced by a command
pub fn code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ExError>() {
        Some(ex) => code_for_kind(ex.kind()),
        None => SOFTWARE,
    }
}
