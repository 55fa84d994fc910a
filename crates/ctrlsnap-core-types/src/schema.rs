//! Canonical schema constants for structured logging and events
//!
//! These constants keep field names identical across the store, engine
//! and CLI so log queries work the same everywhere.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";

// Entity identifiers
pub const FIELD_SOURCE_ID: &str = "source_id";
pub const FIELD_SNAPSHOT_ID: &str = "snapshot_id";
pub const FIELD_TARGET_TYPE: &str = "target_type";
pub const FIELD_TARGET_NAME: &str = "target_name";
pub const FIELD_DATA_SOURCE: &str = "data_source";
pub const FIELD_MIGRATION_VERSION: &str = "migration_version";
pub const FIELD_QUEUE: &str = "queue";

// Collection sizes
pub const FIELD_ROW_COUNT: &str = "row_count";
pub const FIELD_PENDING_COUNT: &str = "pending_count";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_accessibility() {
        assert!(!FIELD_COMPONENT.is_empty());
        assert!(!FIELD_OP.is_empty());
        assert!(!FIELD_SNAPSHOT_ID.is_empty());
        assert!(!EVENT_START.is_empty());
        assert!(!EVENT_END.is_empty());
        assert!(!EVENT_END_ERROR.is_empty());
    }

    #[test]
    fn test_event_names_are_distinct() {
        assert_ne!(EVENT_START, EVENT_END);
        assert_ne!(EVENT_START, EVENT_END_ERROR);
        assert_ne!(EVENT_END, EVENT_END_ERROR);
    }
}
