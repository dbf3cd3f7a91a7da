//! Entry form slot generation.
//!
//! A form is described by metadata: which dimensions (element, day, hour) the
//! user fixes with selectors, which one or two dimensions vary across the
//! entry fields, and whether the fields are laid out as a list or a grid.
//! [`FormDefinition`] expands that metadata and a [`Selection`] into the
//! complete set of observation slots, pairing each with an existing record
//! or a fresh empty one.

mod definition;
mod slot;

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

pub use definition::{FormDefinition, FormEntry, SlotLayout};
pub use slot::FormSlot;

/// A dimension along which form slots vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dimension {
    /// Observed element.
    Element,
    /// Day of the month.
    Day,
    /// Hour of the day.
    Hour,
}

impl Dimension {
    /// Every dimension.
    pub const ALL: [Dimension; 3] = [Dimension::Element, Dimension::Day, Dimension::Hour];

    /// The metadata name of the dimension.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Element => "ELEMENT",
            Self::Day => "DAY",
            Self::Hour => "HOUR",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How entry fields are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Layout {
    /// One field dimension, one slot per field.
    Linear,
    /// Two field dimensions, rows by columns.
    Grid,
}

/// Layout metadata of a data-entry form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormMetadata {
    /// Dimensions the user fixes before entering data.
    pub selectors: Vec<Dimension>,
    /// Dimensions that vary across entry fields (rows first for grids).
    pub fields: Vec<Dimension>,
    /// Field arrangement.
    pub layout: Layout,
    /// Elements entered on this form.
    pub element_ids: Vec<i64>,
    /// Local hours entered on this form.
    pub hours: Vec<u32>,
    /// Observation interval in minutes.
    pub interval: i64,
}

/// Selector values chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Year.
    pub year: i32,
    /// Month, 1-based.
    pub month: u32,
    /// Day of month, when fixed.
    pub day: Option<u32>,
    /// Local hour, when fixed.
    pub hour: Option<u32>,
    /// Element, when fixed.
    pub element_id: Option<i64>,
}

impl Selection {
    /// A selection of a whole month with nothing else fixed.
    #[must_use]
    pub fn month(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            day: None,
            hour: None,
            element_id: None,
        }
    }

    /// Fix the day.
    #[must_use]
    pub fn with_day(self, day: u32) -> Self {
        Self {
            day: Some(day),
            ..self
        }
    }

    /// Fix the hour.
    #[must_use]
    pub fn with_hour(self, hour: u32) -> Self {
        Self {
            hour: Some(hour),
            ..self
        }
    }

    /// Fix the element.
    #[must_use]
    pub fn with_element(self, element_id: i64) -> Self {
        Self {
            element_id: Some(element_id),
            ..self
        }
    }

    /// The initial selection a form opens with on `today`.
    ///
    /// Each selector starts at the first value the form offers, or today's
    /// day for the day selector.
    #[must_use]
    pub fn initial(form: &FormMetadata, today: NaiveDate) -> Self {
        let selects = |dim| form.selectors.contains(&dim);
        Self {
            year: today.year(),
            month: today.month(),
            day: selects(Dimension::Day).then(|| today.day()),
            hour: if selects(Dimension::Hour) {
                form.hours.first().copied()
            } else {
                None
            },
            element_id: if selects(Dimension::Element) {
                form.element_ids.first().copied()
            } else {
                None
            },
        }
    }
}

/// One point along a field dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDefinition {
    /// Element id, day of month, or hour.
    pub id: i64,
    /// Header label.
    pub label: String,
}

impl FieldDefinition {
    fn padded(id: u32) -> Self {
        Self {
            id: i64::from(id),
            label: format!("{id:02}"),
        }
    }
}
