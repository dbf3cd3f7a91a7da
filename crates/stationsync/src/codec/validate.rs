//! Flag and range rules for entered observations.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::token::{parse, EntryScale, FormatError};
use crate::observation::Flag;

/// A flag that is unknown or inconsistent with the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlagError {
    /// More than one letter was typed after the number.
    #[error("Invalid Flag, single letter expected")]
    NotSingleLetter,

    /// The letter matches no known flag.
    #[error("Invalid Flag")]
    Unknown,

    /// The source does not accept missing values.
    #[error("Missing value not allowed")]
    MissingNotAllowed,

    /// The missing flag was combined with a value.
    #[error("Invalid Flag, M is used for missing observations ONLY e.g when no observation was made")]
    MissingWithValue,

    /// A non-missing flag was typed without a value.
    #[error("Invalid Flag, use M for missing observation")]
    MissingRequired,
}

/// Any error that blocks an entry from being saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EntryError {
    /// The token grammar was violated.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The flag is unknown or inconsistent.
    #[error(transparent)]
    Flag(#[from] FlagError),
}

/// Lower and upper plausibility limits for an element, in stored units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeThreshold {
    /// Smallest plausible value.
    pub lower_threshold: f64,
    /// Largest plausible value.
    pub upper_threshold: f64,
}

/// Which limit a value crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeViolation {
    /// The value is below the lower threshold.
    BelowLower,
    /// The value is above the upper threshold.
    AboveUpper,
}

/// An out-of-range value. Advisory only; the entry may still be saved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeWarning {
    /// Which limit was crossed.
    pub violation: RangeViolation,
    /// The crossed limit, in stored units.
    pub limit: f64,
}

impl RangeWarning {
    /// Warning text with the limit shown in the units the user types.
    #[must_use]
    pub fn message(&self, scale: EntryScale) -> String {
        let limit = scale.to_entry(self.limit);
        match self.violation {
            RangeViolation::BelowLower => format!("Value less than lower limit {limit}"),
            RangeViolation::AboveUpper => format!("Value higher than upper limit {limit}"),
        }
    }
}

impl fmt::Display for RangeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message(EntryScale::Unscaled))
    }
}

/// Outcome of validating one entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validation {
    /// The value in stored units.
    pub value: Option<f64>,
    /// The resolved flag, if the flag text was valid.
    pub flag: Option<Flag>,
    /// Blocking errors.
    pub errors: Vec<EntryError>,
    /// Non-blocking warnings.
    pub warnings: Vec<RangeWarning>,
}

impl Validation {
    /// Check if the entry may be saved.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Check if there are advisory warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// The first blocking error, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&EntryError> {
        self.errors.first()
    }
}

/// Validate a parsed value and flag.
///
/// `value` is in stored units. The range threshold, when given, only ever
/// produces warnings.
#[must_use]
pub fn validate(
    value: Option<f64>,
    flag_letter: Option<&str>,
    allow_missing: bool,
    threshold: Option<&RangeThreshold>,
) -> Validation {
    let mut validation = Validation {
        value,
        ..Validation::default()
    };

    if let (Some(value), Some(threshold)) = (value, threshold) {
        if let Some(warning) = check_range(value, threshold) {
            validation.warnings.push(warning);
        }
    }

    if let Some(letter) = flag_letter {
        match check_flag(value, letter, allow_missing) {
            Ok(flag) => validation.flag = Some(flag),
            Err(err) => validation.errors.push(err.into()),
        }
    }

    validation
}

/// Parse then validate a token. A format error short-circuits the rules.
#[must_use]
pub fn check_entry(
    token: &str,
    scale: EntryScale,
    allow_missing: bool,
    threshold: Option<&RangeThreshold>,
) -> Validation {
    match parse(token, scale) {
        Ok(parsed) => validate(
            parsed.value,
            parsed.flag_letter.as_deref(),
            allow_missing,
            threshold,
        ),
        Err(err) => Validation {
            errors: vec![err.into()],
            ..Validation::default()
        },
    }
}

fn check_range(value: f64, threshold: &RangeThreshold) -> Option<RangeWarning> {
    if value < threshold.lower_threshold {
        Some(RangeWarning {
            violation: RangeViolation::BelowLower,
            limit: threshold.lower_threshold,
        })
    } else if value > threshold.upper_threshold {
        Some(RangeWarning {
            violation: RangeViolation::AboveUpper,
            limit: threshold.upper_threshold,
        })
    } else {
        None
    }
}

fn check_flag(value: Option<f64>, letter: &str, allow_missing: bool) -> Result<Flag, FlagError> {
    if letter.chars().count() > 1 {
        return Err(FlagError::NotSingleLetter);
    }

    let flag = Flag::from_letter(letter).ok_or(FlagError::Unknown)?;

    if flag == Flag::Missing && !allow_missing {
        return Err(FlagError::MissingNotAllowed);
    }

    match (value, flag) {
        (Some(_), Flag::Missing) => Err(FlagError::MissingWithValue),
        (None, f) if f != Flag::Missing => Err(FlagError::MissingRequired),
        _ => Ok(flag),
    }
}
