//! Error types for stationsync.
//!
//! This module defines the crate-level error type. Entry validation errors
//! live in [`crate::codec`] and transport errors in [`crate::remote`]; both
//! convert into [`Error`] when they have to cross a module boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::remote::TransportError;

/// The main error type for stationsync operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the cache database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A record violates the value/flag invariant and cannot be stored.
    #[error("invalid observation record {key}: {reason}")]
    InvalidRecord {
        /// Display form of the record's composite key.
        key: String,
        /// Why the record was refused.
        reason: String,
    },

    /// A row read back from the cache could not be decoded.
    #[error("corrupt cache row: {0}")]
    CorruptRow(String),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Form Errors ===
    /// Form metadata cannot be turned into a slot layout.
    ///
    /// This is an authoring bug in the form metadata, not a transient
    /// condition, and is reported when the form is set up.
    #[error("invalid form configuration: {message}")]
    FormConfig {
        /// Description of the configuration problem.
        message: String,
    },

    // === Remote Errors ===
    /// A call to the remote observation API failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for stationsync operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new form configuration error.
    #[must_use]
    pub fn form_config(message: impl Into<String>) -> Self {
        Self::FormConfig {
            message: message.into(),
        }
    }

    /// Check if this error is a transport-level network failure.
    #[must_use]
    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_network())
    }
}
