//! Remote observation API.
//!
//! The engine and the service talk to the remote authority through the
//! [`ObservationTransport`] trait so they can be driven by a mock in tests.
//! [`HttpTransport`] is the production implementation.

mod http;
#[cfg(test)]
pub(crate) mod mock;
mod query;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observation::{CompositeKey, ObservationRecord};

pub use http::HttpTransport;
pub use query::to_query_pairs;

/// Failure of a call to the remote API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The server could not be reached (offline, DNS, refused, timed out).
    #[error("network unavailable: {0}")]
    Network(String),

    /// The server answered with an error status.
    #[error("server rejected request ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, or the status reason.
        message: String,
        /// The offending record, when the server echoed one back.
        rejected: Option<Box<ObservationRecord>>,
    },

    /// A request could not be encoded or a response body could not be read.
    #[error("malformed exchange with server: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a server error without a rejected record.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
            rejected: None,
        }
    }

    /// Create a server error naming the record that caused it.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>, record: ObservationRecord) -> Self {
        Self::Server {
            status,
            message: message.into(),
            rejected: Some(Box::new(record)),
        }
    }

    /// Create an encoding or decoding error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Check if the server was unreachable.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// The record the server refused, if it named one.
    #[must_use]
    pub fn rejected_record(&self) -> Option<&ObservationRecord> {
        match self {
            Self::Server { rejected, .. } => rejected.as_deref(),
            Self::Network(_) | Self::Protocol(_) => None,
        }
    }
}

/// Query for the records backing one data-entry form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFormQuery {
    /// Station identifier.
    pub station_id: String,
    /// Source (form) identifier.
    pub source_id: i64,
    /// Observation level.
    pub level: i64,
    /// Elements shown on the form.
    pub element_ids: Vec<i64>,
    /// First observation time, inclusive, in UTC.
    pub from_date: DateTime<Utc>,
    /// Last observation time, inclusive, in UTC.
    pub to_date: DateTime<Utc>,
}

/// General observation search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationQuery {
    /// Restrict to these stations.
    pub station_ids: Option<Vec<String>>,
    /// Restrict to these sources.
    pub source_ids: Option<Vec<i64>>,
    /// Restrict to these elements.
    pub element_ids: Option<Vec<i64>>,
    /// Restrict to one level.
    pub level: Option<i64>,
    /// Restrict to one interval.
    pub interval: Option<i64>,
    /// Earliest observation time.
    pub from_date: Option<DateTime<Utc>>,
    /// Latest observation time.
    pub to_date: Option<DateTime<Utc>>,
    /// Page number, starting at 1.
    pub page: Option<u32>,
    /// Records per page.
    pub page_size: Option<u32>,
}

/// Access to the remote observation authority.
#[async_trait]
pub trait ObservationTransport: fmt::Debug + Send + Sync {
    /// Upsert a batch of records in one request.
    async fn bulk_put(&self, records: &[ObservationRecord]) -> Result<(), TransportError>;

    /// Fetch the records for a data-entry form.
    async fn find_entry_form_data(
        &self,
        query: &EntryFormQuery,
    ) -> Result<Vec<ObservationRecord>, TransportError>;

    /// Search observations.
    async fn find(&self, query: &ObservationQuery) -> Result<Vec<ObservationRecord>, TransportError>;

    /// Undo a soft delete. Returns the number of records the server changed.
    async fn restore(&self, keys: &[CompositeKey]) -> Result<u64, TransportError>;

    /// Mark records deleted while keeping them restorable.
    async fn soft_delete(&self, keys: &[CompositeKey]) -> Result<u64, TransportError>;

    /// Remove records permanently.
    async fn hard_delete(&self, keys: &[CompositeKey]) -> Result<u64, TransportError>;
}
