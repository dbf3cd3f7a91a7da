//! Parsing and formatting of value-flag tokens.
//!
//! A token is what the user types into an entry cell: a number optionally
//! followed by a flag letter (`205E`), a flag on its own (`M`), or nothing.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::observation::Flag;

/// Grammar for tokens that contain a number.
const TOKEN_PATTERN: &str = r"^(?P<number>[-+]?(?:\d+(?:\.\d*)?|\.\d+))(?P<flag>[A-Za-z]*)$";

/// Decimal places kept when converting between entry and stored units.
const ROUNDING_PLACES: i32 = 4;

/// A token that does not follow the entry grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The token is neither a number with an optional flag nor a flag.
    #[error("Incorrect input format not allowed")]
    IncorrectFormat,

    /// Scaled entries must be typed as integers.
    #[error("Decimals not allowed")]
    DecimalsNotAllowed,
}

/// How typed numbers map onto stored values.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EntryScale {
    /// Values are typed in stored units.
    #[default]
    Unscaled,
    /// Values are typed as integers; stored value = typed value / factor.
    Factor(f64),
}

impl EntryScale {
    /// Resolve the scale for an element.
    ///
    /// An absent or non-positive factor leaves integer-only entry in place
    /// but does not change the value.
    #[must_use]
    pub fn for_element(scale_enabled: bool, entry_scale_factor: Option<f64>) -> Self {
        if !scale_enabled {
            return Self::Unscaled;
        }
        Self::Factor(entry_scale_factor.filter(|f| *f > 0.0).unwrap_or(1.0))
    }

    /// Check if scaled (integer-only) entry is in effect.
    #[must_use]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Factor(_))
    }

    /// The multiplier between stored and entry units.
    #[must_use]
    pub fn factor(self) -> f64 {
        match self {
            Self::Unscaled => 1.0,
            Self::Factor(f) => f,
        }
    }

    /// Convert a typed number into stored units.
    #[must_use]
    pub fn to_stored(self, entered: f64) -> f64 {
        match self {
            Self::Unscaled => entered,
            Self::Factor(f) => entered / f,
        }
    }

    /// Convert a stored value into the units the user types.
    #[must_use]
    pub fn to_entry(self, stored: f64) -> f64 {
        match self {
            Self::Unscaled => stored,
            Self::Factor(f) => round_off(stored * f, ROUNDING_PLACES),
        }
    }
}

/// The pieces of a syntactically valid token.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedToken {
    /// The value in stored units.
    pub value: Option<f64>,
    /// The typed flag text, uppercased. Not yet checked against known flags.
    pub flag_letter: Option<String>,
}

impl ParsedToken {
    /// Check if the token was empty (a cleared slot).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.flag_letter.is_none()
    }
}

fn token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(TOKEN_PATTERN).expect("token pattern is valid"))
}

/// Parse a value-flag token.
///
/// Surrounding whitespace is ignored. A token without digits is treated as a
/// flag on its own.
///
/// # Errors
///
/// Returns [`FormatError`] if the token does not follow the grammar, or if
/// scaling is enabled and the number has a decimal point.
pub fn parse(token: &str, scale: EntryScale) -> Result<ParsedToken, FormatError> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(ParsedToken::default());
    }

    if !token.chars().any(|c| c.is_ascii_digit()) {
        return Ok(ParsedToken {
            value: None,
            flag_letter: Some(token.to_uppercase()),
        });
    }

    let captures = token_regex()
        .captures(token)
        .ok_or(FormatError::IncorrectFormat)?;
    let number = captures
        .name("number")
        .map_or("", |m| m.as_str());
    let flag = captures.name("flag").map_or("", |m| m.as_str());

    if scale.is_enabled() && number.contains('.') {
        return Err(FormatError::DecimalsNotAllowed);
    }

    let entered: f64 = number.parse().map_err(|_| FormatError::IncorrectFormat)?;

    Ok(ParsedToken {
        value: Some(scale.to_stored(entered)),
        flag_letter: (!flag.is_empty()).then(|| flag.to_uppercase()),
    })
}

/// Format a stored value and flag as the token a user would type.
#[must_use]
pub fn format(value: Option<f64>, flag: Option<Flag>, scale: EntryScale) -> String {
    let mut token = value
        .map(|v| scale.to_entry(v).to_string())
        .unwrap_or_default();

    // Two-digit entry for factor-10 elements, e.g. 0.5 shows as "05".
    if scale.is_enabled() && scale.factor() >= 10.0 && token.chars().count() == 1 {
        token.insert(0, '0');
    }

    if let Some(flag) = flag {
        token.push(flag.letter());
    }
    token
}

/// Round to the given number of decimal places.
#[must_use]
pub fn round_off(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}
