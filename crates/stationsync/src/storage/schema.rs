//! `SQLite` schema definitions for the observation cache.

/// SQL statement to create the cached observations table.
///
/// The primary key is the observation's composite identity, so writes through
/// `INSERT ... ON CONFLICT` are upserts.
pub const CREATE_OBSERVATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS observations (
    station_id TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    level INTEGER NOT NULL,
    element_id INTEGER NOT NULL,
    datetime TEXT NOT NULL,
    interval INTEGER NOT NULL,
    value REAL,
    flag TEXT,
    comment TEXT,
    sync_state TEXT NOT NULL CHECK (sync_state IN ('synced', 'unsynced')),
    entry_datetime TEXT NOT NULL,
    server_error_message TEXT,
    PRIMARY KEY (station_id, source_id, level, element_id, datetime, interval),
    CHECK (NOT (value IS NOT NULL AND flag = 'missing'))
)
";

/// SQL statement to create an index for draining the unsynced queue in order.
pub const CREATE_SYNC_STATE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_observations_sync_state
ON observations(sync_state, entry_datetime)
";

/// SQL statement to create an index for form lookups by station and time.
pub const CREATE_STATION_DATETIME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_observations_station_datetime
ON observations(station_id, source_id, element_id, datetime)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_OBSERVATIONS_TABLE,
    CREATE_SYNC_STATE_INDEX,
    CREATE_STATION_DATETIME_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_observations_table_keys_on_composite_identity() {
        assert!(CREATE_OBSERVATIONS_TABLE
            .contains("PRIMARY KEY (station_id, source_id, level, element_id, datetime, interval)"));
        assert!(CREATE_OBSERVATIONS_TABLE.contains("sync_state TEXT NOT NULL"));
        assert!(CREATE_OBSERVATIONS_TABLE.contains("entry_datetime TEXT NOT NULL"));
    }

    #[test]
    fn test_create_metadata_table_structure() {
        assert!(CREATE_METADATA_TABLE.contains("key TEXT PRIMARY KEY"));
        assert!(CREATE_METADATA_TABLE.contains("value TEXT NOT NULL"));
    }
}
