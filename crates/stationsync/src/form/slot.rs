//! Entry state of a single form slot.

use crate::codec::{self, check_entry, EntryScale, RangeThreshold, Validation};
use crate::observation::{CompositeKey, Flag, ObservationRecord};

/// Places kept when summing displayed values.
const TOTAL_PLACES: i32 = 4;

/// One cell of an entry form.
///
/// Holds the observation behind the cell and what the user typed into it.
/// The record's identity never changes; only value, flag and comment do.
#[derive(Debug, Clone, PartialEq)]
pub struct FormSlot {
    record: ObservationRecord,
    loaded: (Option<f64>, Option<Flag>, Option<String>),
    exists: bool,
    scale: EntryScale,
    allow_missing: bool,
    threshold: Option<RangeThreshold>,
    token: String,
    validation: Validation,
}

impl FormSlot {
    pub(crate) fn new(
        record: ObservationRecord,
        exists: bool,
        scale: EntryScale,
        allow_missing: bool,
        threshold: Option<RangeThreshold>,
    ) -> Self {
        let token = codec::format(record.value, record.flag, scale);
        let validation = Validation {
            value: record.value,
            flag: record.flag,
            ..Validation::default()
        };
        Self {
            loaded: (record.value, record.flag, record.comment.clone()),
            record,
            exists,
            scale,
            allow_missing,
            threshold,
            token,
            validation,
        }
    }

    /// The observation behind this slot.
    #[must_use]
    pub fn record(&self) -> &ObservationRecord {
        &self.record
    }

    /// The slot's composite identity.
    #[must_use]
    pub fn key(&self) -> CompositeKey {
        self.record.key()
    }

    /// Check if the record came from a data source rather than being new.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// The value-flag text shown in the cell.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// How values in this cell are typed.
    #[must_use]
    pub fn scale(&self) -> EntryScale {
        self.scale
    }

    /// The result of the last input.
    #[must_use]
    pub fn validation(&self) -> &Validation {
        &self.validation
    }

    /// Take user input for this cell.
    ///
    /// The token is validated; only a valid token updates the record. An
    /// empty comment clears it.
    pub fn apply_input(&mut self, token: &str, comment: Option<&str>) -> &Validation {
        self.token = token.trim().to_string();
        self.validation = check_entry(token, self.scale, self.allow_missing, self.threshold.as_ref());

        if self.validation.is_valid() {
            let comment = comment
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            self.record = self
                .record
                .with_entry(self.validation.value, self.validation.flag, comment);
        }
        &self.validation
    }

    /// Check if value, flag or comment differ from what was loaded.
    #[must_use]
    pub fn changed(&self) -> bool {
        let (value, flag, comment) = &self.loaded;
        self.record.value != *value || self.record.flag != *flag || self.record.comment != *comment
    }

    /// The value in the units the user types, if any.
    #[must_use]
    pub fn display_value(&self) -> Option<f64> {
        self.record.value.map(|v| self.scale.to_entry(v))
    }

    /// Accept the current entry as the new baseline after a save.
    pub fn mark_saved(&mut self) {
        self.loaded = (
            self.record.value,
            self.record.flag,
            self.record.comment.clone(),
        );
        self.exists = true;
    }

    /// Sum of the displayed values of `slots`, or `None` when all are empty.
    #[must_use]
    pub fn total_of<'a>(slots: impl IntoIterator<Item = &'a FormSlot>) -> Option<f64> {
        slots
            .into_iter()
            .filter_map(FormSlot::display_value)
            .reduce(|total, value| total + value)
            .map(|total| codec::round_off(total, TOTAL_PLACES))
    }
}
