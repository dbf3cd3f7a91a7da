//! Local cache store for stationsync.
//!
//! This module provides `SQLite`-based durable storage for observation
//! records, keyed by their composite identity and marked with a sync state.
//! The engine drains unsynced entries from here; the service falls back to it
//! when the remote API is unreachable.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::observation::{
    format_datetime, CacheEntry, CompositeKey, Flag, ObservationRecord, SyncState,
};
use crate::remote::EntryFormQuery;

/// Columns read back for every cache entry, in `RawEntry` order.
const ENTRY_COLUMNS: &str = "station_id, source_id, level, element_id, datetime, interval, \
     value, flag, comment, sync_state, entry_datetime, server_error_message";

const UPSERT_SQL: &str = r"
INSERT INTO observations (
    station_id, source_id, level, element_id, datetime, interval,
    value, flag, comment, sync_state, entry_datetime, server_error_message
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT (station_id, source_id, level, element_id, datetime, interval) DO UPDATE SET
    value = excluded.value,
    flag = excluded.flag,
    comment = excluded.comment,
    sync_state = excluded.sync_state,
    entry_datetime = excluded.entry_datetime,
    server_error_message = excluded.server_error_message
";

/// A cache store shared by the foreground service and the sync engine.
///
/// Guards must never be held across an `.await`.
pub type SharedStore = Arc<Mutex<CacheStore>>;

/// Lock a shared store.
///
/// # Errors
///
/// Returns an internal error if a previous holder panicked.
pub fn lock(store: &SharedStore) -> Result<MutexGuard<'_, CacheStore>> {
    store
        .lock()
        .map_err(|_| Error::internal("cache store lock poisoned"))
}

const KEY_PREDICATE: &str = "station_id = ?1 AND source_id = ?2 AND level = ?3 \
     AND element_id = ?4 AND datetime = ?5 AND interval = ?6";

/// Durable keyed store of cached observations.
///
/// Provides persistent storage using `SQLite` with support for:
/// - Transactional upserts keyed on the composite identity
/// - Point lookups, deletes and sync-state counts
/// - Ordered reads of the unsynced queue
/// - Range lookups for entry forms
#[derive(Debug)]
pub struct CacheStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl CacheStore {
    /// Open or create a cache database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening cache at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Cache opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory cache for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wrap the store for sharing between tasks.
    #[must_use]
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Get a single cached entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the row is corrupt.
    pub fn get(&self, key: &CompositeKey) -> Result<Option<CacheEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM observations WHERE {KEY_PREDICATE}");
        let raw = self
            .conn
            .query_row(&sql, key_params(key), RawEntry::from_row)
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    /// Get the cached entries for the given keys.
    ///
    /// Keys with no cached entry are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn get_by_keys(&self, keys: &[CompositeKey]) -> Result<Vec<CacheEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM observations WHERE {KEY_PREDICATE}");
        let mut stmt = self.conn.prepare_cached(&sql)?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = stmt
                .query_row(key_params(key), RawEntry::from_row)
                .optional()?
            {
                entries.push(raw.into_entry()?);
            }
        }
        Ok(entries)
    }

    /// Upsert records with the given sync state in one transaction.
    ///
    /// Existing entries with the same composite key are replaced and stamped
    /// with the current time. Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] if any record pairs a value with the
    /// missing flag (nothing is written), or an error if the database
    /// operation fails.
    pub fn put_many(&self, records: &[ObservationRecord], sync_state: SyncState) -> Result<usize> {
        let entries: Vec<CacheEntry> = records
            .iter()
            .map(|record| CacheEntry::new(record.clone(), sync_state))
            .collect();
        self.put_entries(&entries)
    }

    /// Store a record as unsynced along with the server's rejection message.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is invalid or the database operation fails.
    pub fn put_rejected(&self, record: &ObservationRecord, message: &str) -> Result<()> {
        let entry = CacheEntry::new(record.clone(), SyncState::Unsynced).with_server_error(message);
        self.put_entries(std::slice::from_ref(&entry))?;
        Ok(())
    }

    /// Upsert fully formed cache entries in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any record is invalid or the database operation fails.
    pub fn put_entries(&self, entries: &[CacheEntry]) -> Result<usize> {
        for entry in entries {
            entry
                .record()
                .check_invariant()
                .map_err(|reason| Error::InvalidRecord {
                    key: entry.record().key().to_string(),
                    reason,
                })?;
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for entry in entries {
                let record = entry.record();
                stmt.execute(params![
                    record.station_id,
                    record.source_id,
                    record.level,
                    record.element_id,
                    format_datetime(&record.datetime),
                    record.interval,
                    record.value,
                    record.flag.map(Flag::as_str),
                    record.comment,
                    entry.sync_state().as_str(),
                    format_datetime(&entry.entry_datetime()),
                    entry.server_error_message(),
                ])?;
            }
        }
        tx.commit()?;

        debug!("Upserted {} cache entries", entries.len());
        Ok(entries.len())
    }

    /// Mark cached entries as synced and drop any rejection message.
    ///
    /// Only rows still holding the pushed snapshot are updated: an entry
    /// rewritten after `entries` were read keeps its state so the next drain
    /// pushes the newer edit. Returns the number of entries updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_synced(&self, entries: &[CacheEntry]) -> Result<usize> {
        let sql = format!(
            "UPDATE observations SET sync_state = 'synced', server_error_message = NULL \
             WHERE {KEY_PREDICATE} AND entry_datetime = ?7 AND value IS ?8 \
             AND flag IS ?9 AND comment IS ?10"
        );
        let tx = self.conn.unchecked_transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for entry in entries {
                let record = entry.record();
                let (station_id, source_id, level, element_id, datetime, interval) =
                    key_params(&record.key());
                updated += stmt.execute(params![
                    station_id,
                    source_id,
                    level,
                    element_id,
                    datetime,
                    interval,
                    format_datetime(&entry.entry_datetime()),
                    record.value,
                    record.flag.map(Flag::as_str),
                    record.comment,
                ])?;
            }
        }
        tx.commit()?;

        if updated < entries.len() {
            debug!(
                "{} pushed entries changed during the push and stay unsynced",
                entries.len() - updated
            );
        }
        Ok(updated)
    }

    /// Delete the cached entries for the given keys.
    ///
    /// Returns the number of entries deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_many(&self, keys: &[CompositeKey]) -> Result<usize> {
        let sql = format!("DELETE FROM observations WHERE {KEY_PREDICATE}");
        let deleted = self.execute_per_key(&sql, keys)?;
        if deleted > 0 {
            debug!("Deleted {} cache entries", deleted);
        }
        Ok(deleted)
    }

    fn execute_per_key(&self, sql: &str, keys: &[CompositeKey]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut affected = 0;
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for key in keys {
                affected += stmt.execute(key_params(key))?;
            }
        }
        tx.commit()?;
        Ok(affected)
    }

    /// Count entries in the given sync state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_where(&self, sync_state: SyncState) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM observations WHERE sync_state = ?1",
            [sync_state.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Count all cached entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Delete every cached entry.
    ///
    /// Returns the number of entries deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_all(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM observations", [])?;
        if affected > 0 {
            info!("Cleared {} cache entries", affected);
        }
        Ok(affected)
    }

    /// Get the oldest unsynced entries, in local entry order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn oldest_unsynced(&self, limit: usize) -> Result<Vec<CacheEntry>> {
        self.list(Some(SyncState::Unsynced), limit)
    }

    /// List cached entries, oldest local entry first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn list(&self, sync_state: Option<SyncState>, limit: usize) -> Result<Vec<CacheEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM observations \
             WHERE ?1 IS NULL OR sync_state = ?1 \
             ORDER BY entry_datetime ASC, rowid ASC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let raws = stmt
            .query_map(
                params![sync_state.map(SyncState::as_str), limit_i64],
                RawEntry::from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raws.into_iter().map(RawEntry::into_entry).collect()
    }

    /// Find cached entries matching an entry-form query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn find_for_query(&self, query: &EntryFormQuery) -> Result<Vec<CacheEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM observations \
             WHERE station_id = ?1 AND source_id = ?2 AND level = ?3 \
             AND datetime >= ?4 AND datetime <= ?5 \
             ORDER BY element_id ASC, datetime ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let raws = stmt
            .query_map(
                params![
                    query.station_id,
                    query.source_id,
                    query.level,
                    format_datetime(&query.from_date),
                    format_datetime(&query.to_date),
                ],
                RawEntry::from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raws.into_iter()
            .filter(|raw| query.element_ids.contains(&raw.element_id))
            .map(RawEntry::into_entry)
            .collect()
    }

    /// Get cache statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<CacheStats> {
        let unsynced = self.count_where(SyncState::Unsynced)?;
        let synced = self.count_where(SyncState::Synced)?;

        let oldest: Option<String> = self
            .conn
            .query_row(
                "SELECT entry_datetime FROM observations WHERE sync_state = 'unsynced' \
                 ORDER BY entry_datetime ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let oldest_unsynced = oldest.and_then(|s| parse_datetime(&s).ok());

        let rejected: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM observations WHERE server_error_message IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(CacheStats {
            total: unsynced + synced,
            unsynced,
            synced,
            rejected: usize::try_from(rejected).unwrap_or(0),
            oldest_unsynced,
            db_size_bytes,
        })
    }
}

/// Statistics about the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total number of cached entries.
    pub total: usize,
    /// Entries waiting to be pushed.
    pub unsynced: usize,
    /// Entries the remote has confirmed.
    pub synced: usize,
    /// Entries carrying a server rejection message.
    pub rejected: usize,
    /// Local entry time of the oldest unsynced entry.
    pub oldest_unsynced: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

fn key_params(key: &CompositeKey) -> (String, i64, i64, i64, String, i64) {
    (
        key.station_id.clone(),
        key.source_id,
        key.level,
        key.element_id,
        format_datetime(&key.datetime),
        key.interval,
    )
}

fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// A cache row before its text columns are decoded.
struct RawEntry {
    station_id: String,
    source_id: i64,
    level: i64,
    element_id: i64,
    datetime: String,
    interval: i64,
    value: Option<f64>,
    flag: Option<String>,
    comment: Option<String>,
    sync_state: String,
    entry_datetime: String,
    server_error_message: Option<String>,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            station_id: row.get(0)?,
            source_id: row.get(1)?,
            level: row.get(2)?,
            element_id: row.get(3)?,
            datetime: row.get(4)?,
            interval: row.get(5)?,
            value: row.get(6)?,
            flag: row.get(7)?,
            comment: row.get(8)?,
            sync_state: row.get(9)?,
            entry_datetime: row.get(10)?,
            server_error_message: row.get(11)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let datetime = parse_datetime(&self.datetime)
            .map_err(|e| Error::CorruptRow(format!("bad datetime '{}': {e}", self.datetime)))?;
        let entry_datetime = parse_datetime(&self.entry_datetime).map_err(|e| {
            Error::CorruptRow(format!("bad entry datetime '{}': {e}", self.entry_datetime))
        })?;
        let flag: Option<Flag> = self
            .flag
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(Error::CorruptRow)?;
        let sync_state: SyncState = self.sync_state.parse().map_err(Error::CorruptRow)?;

        let record = ObservationRecord {
            station_id: self.station_id,
            source_id: self.source_id,
            level: self.level,
            element_id: self.element_id,
            datetime,
            interval: self.interval,
            value: self.value,
            flag,
            comment: self.comment,
        };

        let entry = CacheEntry::new(record, sync_state).with_entry_datetime(entry_datetime);
        Ok(match self.server_error_message {
            Some(message) => entry.with_server_error(message),
            None => entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::tests::{test_key, test_record};
    use chrono::{Duration, TimeZone};

    fn create_test_store() -> CacheStore {
        CacheStore::open_in_memory().expect("failed to create test store")
    }

    fn form_query(element_ids: Vec<i64>) -> EntryFormQuery {
        EntryFormQuery {
            station_id: "ST001".to_string(),
            source_id: 1,
            level: 0,
            element_ids,
            from_date: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
            to_date: Utc.with_ymd_and_hms(2024, 3, 5, 23, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = CacheStore::open_in_memory();
        assert!(store.is_ok());
    }

    #[test]
    fn test_put_and_get() {
        let store = create_test_store();
        let record = test_record(101, 6, Some(20.5));

        assert_eq!(store.put_many(&[record.clone()], SyncState::Unsynced).unwrap(), 1);

        let entry = store.get(&record.key()).unwrap().unwrap();
        assert_eq!(entry.record(), &record);
        assert_eq!(entry.sync_state(), SyncState::Unsynced);
        assert!(entry.server_error_message().is_none());
    }

    #[test]
    fn test_get_nonexistent() {
        let store = create_test_store();
        assert!(store.get(&test_key(1, 0)).unwrap().is_none());
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = create_test_store();
        let records = vec![test_record(1, 6, Some(1.0)), test_record(2, 6, None)];

        store.put_many(&records, SyncState::Unsynced).unwrap();
        store.put_many(&records, SyncState::Unsynced).unwrap();

        assert_eq!(store.count().unwrap(), 2);
        let keys: Vec<_> = records.iter().map(ObservationRecord::key).collect();
        let entries = store.get_by_keys(&keys).unwrap();
        let stored: Vec<_> = entries.iter().map(|e| e.record().clone()).collect();
        assert_eq!(stored, records);
    }

    #[test]
    fn test_put_last_write_wins() {
        let store = create_test_store();
        let first = test_record(1, 6, Some(1.0));
        let second = first.with_entry(Some(2.0), Some(Flag::Estimated), Some("recheck".into()));

        store.put_many(&[first], SyncState::Synced).unwrap();
        store.put_many(&[second.clone()], SyncState::Unsynced).unwrap();

        let entry = store.get(&second.key()).unwrap().unwrap();
        assert_eq!(entry.record(), &second);
        assert_eq!(entry.sync_state(), SyncState::Unsynced);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_put_rejects_value_with_missing_flag() {
        let store = create_test_store();
        let good = test_record(1, 6, Some(1.0));
        let bad = test_record(2, 6, Some(3.0)).with_entry(Some(3.0), Some(Flag::Missing), None);

        let err = store
            .put_many(&[good, bad], SyncState::Unsynced)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { .. }));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_check_constraint_backs_invariant() {
        let store = create_test_store();
        let result = store.conn.execute(
            "INSERT INTO observations VALUES ('S', 1, 0, 1, '2024-01-01T00:00:00.000Z', 1440, \
             5.0, 'missing', NULL, 'unsynced', '2024-01-01T00:00:00.000Z', NULL)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_get_by_keys_partial_miss() {
        let store = create_test_store();
        store
            .put_many(&[test_record(1, 6, Some(1.0))], SyncState::Synced)
            .unwrap();

        let entries = store
            .get_by_keys(&[test_key(1, 6), test_key(2, 6), test_key(1, 9)])
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record().element_id, 1);
    }

    #[test]
    fn test_delete_many() {
        let store = create_test_store();
        let records = vec![
            test_record(1, 6, Some(1.0)),
            test_record(2, 6, Some(2.0)),
            test_record(3, 6, Some(3.0)),
        ];
        store.put_many(&records, SyncState::Unsynced).unwrap();

        let deleted = store
            .delete_many(&[test_key(1, 6), test_key(3, 6), test_key(9, 6)])
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get(&test_key(2, 6)).unwrap().is_some());
    }

    #[test]
    fn test_count_where() {
        let store = create_test_store();
        store
            .put_many(
                &[test_record(1, 6, Some(1.0)), test_record(2, 6, Some(2.0))],
                SyncState::Unsynced,
            )
            .unwrap();
        store
            .put_many(&[test_record(3, 6, Some(3.0))], SyncState::Synced)
            .unwrap();

        assert_eq!(store.count_where(SyncState::Unsynced).unwrap(), 2);
        assert_eq!(store.count_where(SyncState::Synced).unwrap(), 1);
    }

    #[test]
    fn test_clear_all() {
        let store = create_test_store();
        store
            .put_many(&[test_record(1, 6, Some(1.0))], SyncState::Synced)
            .unwrap();
        store
            .put_many(&[test_record(2, 6, Some(1.0))], SyncState::Unsynced)
            .unwrap();

        assert_eq!(store.clear_all().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.clear_all().unwrap(), 0);
    }

    #[test]
    fn test_mark_synced_clears_rejection() {
        let store = create_test_store();
        let record = test_record(1, 6, Some(1.0));
        store.put_rejected(&record, "Hour not allowed").unwrap();

        let entry = store.get(&record.key()).unwrap().unwrap();
        assert_eq!(entry.server_error_message(), Some("Hour not allowed"));
        assert!(!entry.is_synced());

        assert_eq!(store.mark_synced(&[entry]).unwrap(), 1);
        let entry = store.get(&record.key()).unwrap().unwrap();
        assert!(entry.is_synced());
        assert!(entry.server_error_message().is_none());
    }

    #[test]
    fn test_mark_synced_skips_entries_edited_since_read() {
        let store = create_test_store();
        let record = test_record(1, 6, Some(1.0));
        let base = Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap();
        store
            .put_entries(&[CacheEntry::new(record.clone(), SyncState::Unsynced).with_entry_datetime(base)])
            .unwrap();
        let snapshot = store.get(&record.key()).unwrap().unwrap();

        let edited = record.with_entry(Some(99.0), None, None);
        store
            .put_entries(&[CacheEntry::new(edited, SyncState::Unsynced)
                .with_entry_datetime(base + Duration::seconds(1))])
            .unwrap();

        assert_eq!(store.mark_synced(&[snapshot]).unwrap(), 0);
        let entry = store.get(&record.key()).unwrap().unwrap();
        assert!(!entry.is_synced());
        assert_eq!(entry.record().value, Some(99.0));
    }

    #[test]
    fn test_mark_synced_matches_null_fields() {
        let store = create_test_store();
        let record = test_record(1, 6, None);
        store.put_many(std::slice::from_ref(&record), SyncState::Unsynced).unwrap();
        let snapshot = store.get(&record.key()).unwrap().unwrap();

        assert_eq!(store.mark_synced(&[snapshot]).unwrap(), 1);
        assert!(store.get(&record.key()).unwrap().unwrap().is_synced());
    }

    #[test]
    fn test_oldest_unsynced_orders_by_entry_time() {
        let store = create_test_store();
        let base = Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap();
        let entries: Vec<CacheEntry> = [(3, 2), (1, 0), (2, 1)]
            .into_iter()
            .map(|(element, minutes)| {
                CacheEntry::new(test_record(element, 6, Some(1.0)), SyncState::Unsynced)
                    .with_entry_datetime(base + Duration::minutes(minutes))
            })
            .collect();
        store.put_entries(&entries).unwrap();
        store
            .put_many(&[test_record(9, 6, Some(1.0))], SyncState::Synced)
            .unwrap();

        let batch = store.oldest_unsynced(2).unwrap();
        let elements: Vec<i64> = batch.iter().map(|e| e.record().element_id).collect();
        assert_eq!(elements, vec![1, 2]);

        let all = store.oldest_unsynced(100).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_list_all_states() {
        let store = create_test_store();
        store
            .put_many(&[test_record(1, 6, Some(1.0))], SyncState::Synced)
            .unwrap();
        store
            .put_many(&[test_record(2, 6, Some(1.0))], SyncState::Unsynced)
            .unwrap();

        assert_eq!(store.list(None, 10).unwrap().len(), 2);
        assert_eq!(store.list(Some(SyncState::Synced), 10).unwrap().len(), 1);
        assert!(store.list(None, 0).unwrap().is_empty());
    }

    #[test]
    fn test_find_for_query() {
        let store = create_test_store();
        let mut other_station = test_record(1, 9, Some(4.0));
        other_station.station_id = "ST999".to_string();
        let mut next_day = test_record(1, 6, Some(5.0));
        next_day.datetime += Duration::days(1);

        store
            .put_many(
                &[
                    test_record(1, 6, Some(1.0)),
                    test_record(2, 12, Some(2.0)),
                    test_record(3, 6, Some(3.0)),
                    other_station,
                    next_day,
                ],
                SyncState::Synced,
            )
            .unwrap();

        let found = store.find_for_query(&form_query(vec![1, 2])).unwrap();
        let elements: Vec<i64> = found.iter().map(|e| e.record().element_id).collect();
        assert_eq!(elements, vec![1, 2]);

        assert!(store.find_for_query(&form_query(vec![])).unwrap().is_empty());
    }

    #[test]
    fn test_stats_empty() {
        let store = create_test_store();
        let stats = store.stats().unwrap();

        assert_eq!(stats.total, 0);
        assert!(stats.oldest_unsynced.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let store = create_test_store();
        store
            .put_many(&[test_record(1, 6, Some(1.0))], SyncState::Synced)
            .unwrap();
        store
            .put_rejected(&test_record(2, 6, Some(1.0)), "Element not allowed")
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.unsynced, 1);
        assert_eq!(stats.rejected, 1);
        assert!(stats.oldest_unsynced.is_some());
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let store = create_test_store();
        store
            .conn
            .execute(
                "INSERT INTO observations VALUES ('S', 1, 0, 1, 'not-a-date', 1440, \
                 5.0, NULL, NULL, 'unsynced', '2024-01-01T00:00:00.000Z', NULL)",
                [],
            )
            .unwrap();

        let err = store.list(None, 10).unwrap_err();
        assert!(matches!(err, Error::CorruptRow(_)));
    }

    #[test]
    fn test_shared_store_lock() {
        let shared = create_test_store().into_shared();
        lock(&shared)
            .unwrap()
            .put_many(&[test_record(1, 6, Some(1.0))], SyncState::Unsynced)
            .unwrap();
        assert_eq!(lock(&shared).unwrap().count().unwrap(), 1);
    }

    #[test]
    fn test_open_file_based() {
        let db_path = std::env::temp_dir().join(format!(
            "stationsync_test_{}.db",
            std::process::id()
        ));

        let store = CacheStore::open(&db_path).unwrap();
        store
            .put_many(&[test_record(1, 6, Some(1.0))], SyncState::Unsynced)
            .unwrap();
        assert_eq!(store.path(), db_path);
        drop(store);

        // Unsynced entries survive a restart.
        let store = CacheStore::open(&db_path).unwrap();
        assert_eq!(store.count_where(SyncState::Unsynced).unwrap(), 1);
        assert!(store.stats().unwrap().db_size_bytes > 0);

        drop(store);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let root = std::env::temp_dir().join(format!("stationsync_test_{}", std::process::id()));
        let nested_path = root.join("nested/cache.db");
        let _ = std::fs::remove_dir_all(&root);

        let store = CacheStore::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(store);
        let _ = std::fs::remove_dir_all(&root);
    }
}
