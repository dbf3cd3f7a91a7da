//! Command-line interface for stationsync.
//!
//! This module provides the CLI structure for the `stsync` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;

pub use commands::{
    CacheCommand, CheckCommand, ConfigCommand, DeleteCommand, FormCommand, KeyArgs, OutputFormat,
    RestoreCommand, StatusCommand, SyncCommand, SyncStateArg,
};

/// stsync - Offline-first observation entry and sync
///
/// Checks value-flag entries, previews data-entry forms, and pushes
/// observations saved while offline to the remote API.
#[derive(Debug, Parser)]
#[command(name = "stsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show cache and sync queue status
    Status(StatusCommand),

    /// Push unsynced observations to the remote API
    Sync(SyncCommand),

    /// Parse and validate a value-flag token
    Check(CheckCommand),

    /// Build a data-entry form and show its slots
    Form(FormCommand),

    /// Delete an observation on the remote API
    Delete(DeleteCommand),

    /// Restore a soft-deleted observation on the remote API
    Restore(RestoreCommand),

    /// Inspect or clear the local cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}
