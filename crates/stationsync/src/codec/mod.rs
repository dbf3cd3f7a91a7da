//! Value-flag codec and entry validation.
//!
//! Users type observations as compact tokens such as `205E`, `M` or `20.5`.
//! This module turns tokens into stored values and flags, formats them back
//! for display, and checks them against flag and range rules. Everything here
//! is pure; nothing touches the cache or the network.
//!
//! # Example
//!
//! ```
//! use stationsync::codec::{check_entry, EntryScale, RangeThreshold};
//! use stationsync::Flag;
//!
//! let threshold = RangeThreshold { lower_threshold: 0.0, upper_threshold: 50.0 };
//! let validation = check_entry("30E", EntryScale::Unscaled, true, Some(&threshold));
//!
//! assert!(validation.is_valid());
//! assert_eq!(validation.value, Some(30.0));
//! assert_eq!(validation.flag, Some(Flag::Estimated));
//! ```

mod token;
mod validate;

pub use token::{format, parse, round_off, EntryScale, FormatError, ParsedToken};
pub use validate::{
    check_entry, validate, EntryError, FlagError, RangeThreshold, RangeViolation, RangeWarning,
    Validation,
};
