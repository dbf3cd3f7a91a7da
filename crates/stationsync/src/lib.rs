//! `stationsync` - Offline-first observation entry and sync
//!
//! This library validates value-flag entries typed into station data-entry
//! forms, expands form metadata into observation slots, and keeps entered
//! observations in a local `SQLite` cache until the remote API confirms them.
//!
//! ```
//! use stationsync::codec::{check_entry, EntryScale};
//! use stationsync::Flag;
//!
//! let validation = check_entry("205E", EntryScale::Factor(10.0), true, None);
//! assert_eq!(validation.value, Some(20.5));
//! assert_eq!(validation.flag, Some(Flag::Estimated));
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod form;
pub mod logging;
pub mod metadata;
pub mod observation;
pub mod remote;
pub mod service;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use observation::{CacheEntry, CompositeKey, Flag, ObservationRecord, SyncState};
pub use service::{ObservationService, SaveOutcome};
pub use storage::{CacheStats, CacheStore, SharedStore};
pub use sync::{SyncEngine, SyncOutcome};
