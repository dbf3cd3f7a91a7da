//! Core observation types for stationsync.
//!
//! This module defines the observation record exchanged with the remote API,
//! its composite identity, the quality flags a reading can carry, and the
//! cache entry wrapper that tracks whether a record reached the server.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Quality flag attached to an observation value.
///
/// Flags are typed by their first letter, so first letters must stay unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    /// No observation was made; the value must be absent.
    Missing,
    /// Trace amount, below the measurable threshold.
    Trace,
    /// Value estimated by the observer.
    Estimated,
    /// Value generated from other observations.
    Generated,
    /// Value accepted with a warning.
    Warning,
    /// Value suspected to be wrong.
    Suspect,
}

impl Flag {
    /// Every known flag.
    pub const ALL: [Flag; 6] = [
        Flag::Missing,
        Flag::Trace,
        Flag::Estimated,
        Flag::Generated,
        Flag::Warning,
        Flag::Suspect,
    ];

    /// The wire and storage name of the flag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Trace => "trace",
            Self::Estimated => "estimated",
            Self::Generated => "generated",
            Self::Warning => "warning",
            Self::Suspect => "suspect",
        }
    }

    /// The uppercase letter users type for this flag.
    #[must_use]
    pub fn letter(self) -> char {
        self.as_str()
            .chars()
            .next()
            .map_or('?', |c| c.to_ascii_uppercase())
    }

    /// Resolve a flag from typed input by case-insensitive first-letter match.
    #[must_use]
    pub fn from_letter(input: &str) -> Option<Self> {
        let first = input.chars().next()?.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|flag| flag.as_str().starts_with(first))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.as_str() == s)
            .ok_or_else(|| format!("unknown flag: {s}"))
    }
}

/// Whether a cached record has been confirmed by the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// The remote acknowledged the record.
    Synced,
    /// The record is waiting to be pushed.
    Unsynced,
}

impl SyncState {
    /// The storage name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Unsynced => "unsynced",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "unsynced" => Ok(Self::Unsynced),
            other => Err(format!("unknown sync state: {other}")),
        }
    }
}

/// Format a datetime the way the cache stores it.
///
/// Fixed-width millisecond precision keeps lexical and chronological order
/// identical, which range queries rely on.
#[must_use]
pub fn format_datetime(datetime: &DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The composite identity of one observation slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeKey {
    /// Station identifier.
    pub station_id: String,
    /// Source (entry form or import template) identifier.
    pub source_id: i64,
    /// Observation level, e.g. height or depth.
    pub level: i64,
    /// Element identifier.
    pub element_id: i64,
    /// Observation time in UTC.
    pub datetime: DateTime<Utc>,
    /// Observation interval in minutes.
    pub interval: i64,
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.station_id,
            self.source_id,
            self.level,
            self.element_id,
            format_datetime(&self.datetime),
            self.interval
        )
    }
}

/// A single observation as entered on a form and sent to the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRecord {
    /// Station identifier.
    pub station_id: String,
    /// Source identifier.
    pub source_id: i64,
    /// Observation level.
    pub level: i64,
    /// Element identifier.
    pub element_id: i64,
    /// Observation time in UTC.
    pub datetime: DateTime<Utc>,
    /// Observation interval in minutes.
    pub interval: i64,
    /// Observed value in stored units.
    pub value: Option<f64>,
    /// Quality flag.
    pub flag: Option<Flag>,
    /// Free-text observer comment.
    pub comment: Option<String>,
}

impl ObservationRecord {
    /// Create an empty record ("nothing entered") for the given identity.
    #[must_use]
    pub fn empty(key: CompositeKey) -> Self {
        Self {
            station_id: key.station_id,
            source_id: key.source_id,
            level: key.level,
            element_id: key.element_id,
            datetime: key.datetime,
            interval: key.interval,
            value: None,
            flag: None,
            comment: None,
        }
    }

    /// The composite identity of this record.
    #[must_use]
    pub fn key(&self) -> CompositeKey {
        CompositeKey {
            station_id: self.station_id.clone(),
            source_id: self.source_id,
            level: self.level,
            element_id: self.element_id,
            datetime: self.datetime,
            interval: self.interval,
        }
    }

    /// Check whether this record shares the given identity.
    #[must_use]
    pub fn has_key(&self, key: &CompositeKey) -> bool {
        self.station_id == key.station_id
            && self.source_id == key.source_id
            && self.level == key.level
            && self.element_id == key.element_id
            && self.datetime == key.datetime
            && self.interval == key.interval
    }

    /// Return a copy with a new value, flag and comment; identity is kept.
    #[must_use]
    pub fn with_entry(&self, value: Option<f64>, flag: Option<Flag>, comment: Option<String>) -> Self {
        Self {
            value,
            flag,
            comment,
            ..self.clone()
        }
    }

    /// Check if nothing has been entered for this record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.flag.is_none()
    }

    /// Check the value/flag invariant.
    ///
    /// `Missing` requires an absent value and an absent value requires
    /// `Missing`, unless the record is entirely empty.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation.
    pub fn check_invariant(&self) -> std::result::Result<(), String> {
        match (self.value, self.flag) {
            (Some(_), Some(Flag::Missing)) => {
                Err("a value cannot carry the missing flag".to_string())
            }
            (None, Some(flag)) if flag != Flag::Missing => Err(format!(
                "flag '{flag}' without a value, use the missing flag instead"
            )),
            _ => Ok(()),
        }
    }
}

/// An observation held in the local cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    record: ObservationRecord,
    sync_state: SyncState,
    entry_datetime: DateTime<Utc>,
    server_error_message: Option<String>,
}

impl CacheEntry {
    /// Create a cache entry stamped with the current time.
    #[must_use]
    pub fn new(record: ObservationRecord, sync_state: SyncState) -> Self {
        Self {
            record,
            sync_state,
            entry_datetime: Utc::now(),
            server_error_message: None,
        }
    }

    /// Return this entry with a different local entry timestamp.
    #[must_use]
    pub fn with_entry_datetime(self, entry_datetime: DateTime<Utc>) -> Self {
        Self {
            entry_datetime,
            ..self
        }
    }

    /// Return this entry annotated with a server rejection message.
    #[must_use]
    pub fn with_server_error(self, message: impl Into<String>) -> Self {
        Self {
            server_error_message: Some(message.into()),
            ..self
        }
    }

    /// The cached observation.
    #[must_use]
    pub fn record(&self) -> &ObservationRecord {
        &self.record
    }

    /// Consume the entry and return the observation.
    #[must_use]
    pub fn into_record(self) -> ObservationRecord {
        self.record
    }

    /// The sync state of the entry.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// When the entry was written locally.
    #[must_use]
    pub fn entry_datetime(&self) -> DateTime<Utc> {
        self.entry_datetime
    }

    /// Why the server last rejected this entry, if it did.
    #[must_use]
    pub fn server_error_message(&self) -> Option<&str> {
        self.server_error_message.as_deref()
    }

    /// Check if the remote has confirmed the entry.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.sync_state == SyncState::Synced
    }
}
