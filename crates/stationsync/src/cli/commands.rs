//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand, ValueEnum};

use crate::codec::{EntryScale, RangeThreshold};
use crate::form::Selection;
use crate::observation::{CompositeKey, SyncState};

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Records pushed per request (overrides configuration)
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Check command arguments.
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// The value-flag token, e.g. "205E" or "M"
    #[arg(allow_hyphen_values = true)]
    pub token: String,

    /// Entry scale factor; values are typed as integers multiplied by it
    #[arg(short, long, value_name = "FACTOR")]
    pub scale: Option<f64>,

    /// Reject the missing flag
    #[arg(long)]
    pub no_missing: bool,

    /// Lower range threshold in stored units
    #[arg(long, requires = "upper", allow_hyphen_values = true)]
    pub lower: Option<f64>,

    /// Upper range threshold in stored units
    #[arg(long, requires = "lower", allow_hyphen_values = true)]
    pub upper: Option<f64>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

impl CheckCommand {
    /// The entry scale the token is typed in.
    #[must_use]
    pub fn entry_scale(&self) -> EntryScale {
        EntryScale::for_element(self.scale.is_some(), self.scale)
    }

    /// The range threshold, when both limits are given.
    #[must_use]
    pub fn threshold(&self) -> Option<RangeThreshold> {
        Some(RangeThreshold {
            lower_threshold: self.lower?,
            upper_threshold: self.upper?,
        })
    }
}

/// Form command arguments.
#[derive(Debug, Args)]
pub struct FormCommand {
    /// JSON file with station, source template and element metadata
    #[arg(short, long, value_name = "FILE")]
    pub metadata: PathBuf,

    /// Year of the form
    #[arg(long)]
    pub year: i32,

    /// Month of the form (1-12)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: u32,

    /// Day of month, when the day is a selector
    #[arg(long)]
    pub day: Option<u32>,

    /// Local hour, when the hour is a selector
    #[arg(long)]
    pub hour: Option<u32>,

    /// Element id, when the element is a selector
    #[arg(long)]
    pub element: Option<i64>,

    /// Build slots from the local cache only
    #[arg(long)]
    pub offline: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl FormCommand {
    /// The selector values given on the command line.
    #[must_use]
    pub fn selection(&self) -> Selection {
        Selection {
            year: self.year,
            month: self.month,
            day: self.day,
            hour: self.hour,
            element_id: self.element,
        }
    }
}

/// Identity of one observation on the command line.
#[derive(Debug, Args)]
pub struct KeyArgs {
    /// Station identifier
    #[arg(long)]
    pub station: String,

    /// Source (form) identifier
    #[arg(long)]
    pub source: i64,

    /// Observation level
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub level: i64,

    /// Element identifier
    #[arg(long)]
    pub element: i64,

    /// Observation time in UTC, e.g. 2024-03-05T06:00:00Z
    #[arg(long)]
    pub datetime: DateTime<Utc>,

    /// Interval in minutes
    #[arg(long)]
    pub interval: i64,
}

impl KeyArgs {
    /// The composite key these arguments name.
    #[must_use]
    pub fn key(&self) -> CompositeKey {
        CompositeKey {
            station_id: self.station.clone(),
            source_id: self.source,
            level: self.level,
            element_id: self.element,
            datetime: self.datetime,
            interval: self.interval,
        }
    }
}

/// Delete command arguments.
#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Observation to delete
    #[command(flatten)]
    pub key: KeyArgs,

    /// Remove permanently instead of soft-deleting
    #[arg(long)]
    pub hard: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Restore command arguments.
#[derive(Debug, Args)]
pub struct RestoreCommand {
    /// Observation to restore
    #[command(flatten)]
    pub key: KeyArgs,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Cache commands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List cached observations
    List {
        /// Only entries in this sync state
        #[arg(short, long, value_enum)]
        state: Option<SyncStateArg>,

        /// Maximum number of entries
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Delete every cached observation, including unsynced ones
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Sync state argument for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncStateArg {
    /// Confirmed by the remote
    Synced,
    /// Waiting to be pushed
    Unsynced,
}

impl From<SyncStateArg> for SyncState {
    fn from(arg: SyncStateArg) -> Self {
        match arg {
            SyncStateArg::Synced => Self::Synced,
            SyncStateArg::Unsynced => Self::Unsynced,
        }
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
