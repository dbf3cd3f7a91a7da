//! Expansion of form metadata into observation slots.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use tracing::debug;

use super::{Dimension, FieldDefinition, FormSlot, Layout, Selection};
use crate::error::{Error, Result};
use crate::metadata::{ElementMetadata, MetadataBundle};
use crate::observation::{CompositeKey, ObservationRecord};
use crate::remote::EntryFormQuery;
use crate::service::{ObservationService, SaveOutcome};

/// Level of every observation entered through a form.
const FORM_LEVEL: i64 = 0;

/// First and last local hour covered by a day.
const FIRST_HOUR: u32 = 0;
const LAST_HOUR: u32 = 23;

/// A form's metadata bound to a validated selection.
#[derive(Debug, Clone)]
pub struct FormDefinition {
    bundle: MetadataBundle,
    selection: Selection,
}

/// The slots of a form, arranged by its layout.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotLayout {
    /// One slot per field.
    Linear {
        /// Field headers.
        fields: Vec<FieldDefinition>,
        /// Slots in field order.
        slots: Vec<FormSlot>,
    },
    /// Rows by columns.
    Grid {
        /// Row headers.
        rows: Vec<FieldDefinition>,
        /// Column headers.
        columns: Vec<FieldDefinition>,
        /// `slots[row][column]`.
        slots: Vec<Vec<FormSlot>>,
    },
}

impl SlotLayout {
    /// All slots, row by row.
    #[must_use]
    pub fn slots(&self) -> Vec<&FormSlot> {
        match self {
            Self::Linear { slots, .. } => slots.iter().collect(),
            Self::Grid { slots, .. } => slots.iter().flatten().collect(),
        }
    }

    /// All slots, mutably.
    pub fn slots_mut(&mut self) -> Vec<&mut FormSlot> {
        match self {
            Self::Linear { slots, .. } => slots.iter_mut().collect(),
            Self::Grid { slots, .. } => slots.iter_mut().flatten().collect(),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Linear { slots, .. } => slots.len(),
            Self::Grid { slots, .. } => slots.iter().map(Vec::len).sum(),
        }
    }

    /// Check if the layout has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FormDefinition {
    /// Bind form metadata to a selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormConfig`] if the metadata cannot produce a slot
    /// layout: a linear form without exactly one field, a grid without
    /// exactly two, a repeated field, a non-field dimension with no selected
    /// value, an out-of-range date or hour, or a fixed element without
    /// metadata.
    pub fn new(bundle: MetadataBundle, selection: Selection) -> Result<Self> {
        let form = &bundle.source.form;

        let supported = match form.layout {
            Layout::Linear => form.fields.len() == 1,
            Layout::Grid => form.fields.len() == 2,
        };
        if !supported {
            return Err(Error::form_config(
                "Developer error: number of entry fields not supported",
            ));
        }
        if form.fields.len() == 2 && form.fields[0] == form.fields[1] {
            return Err(Error::form_config(format!(
                "entry field {} is repeated",
                form.fields[0]
            )));
        }

        last_day_of_month(selection.year, selection.month)?;

        let definition = Self { bundle, selection };
        for dim in Dimension::ALL {
            if !definition.is_field(dim) {
                definition.fixed_value(dim)?;
            }
        }

        if let Some(hour) = definition.hours_in_use().into_iter().find(|h| *h > LAST_HOUR) {
            return Err(Error::form_config(format!("hour {hour} is out of range")));
        }
        if let Some(day) = definition.selection.day.filter(|_| !definition.is_field(Dimension::Day)) {
            date(definition.selection.year, definition.selection.month, day)?;
        }
        if let Some(id) = definition
            .selection
            .element_id
            .filter(|_| !definition.is_field(Dimension::Element))
        {
            definition.element(id)?;
        }

        Ok(definition)
    }

    /// The metadata this form was built from.
    #[must_use]
    pub fn bundle(&self) -> &MetadataBundle {
        &self.bundle
    }

    /// The selection this form was built for.
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.selection
    }

    fn is_field(&self, dim: Dimension) -> bool {
        self.bundle.source.form.fields.contains(&dim)
    }

    fn hours_in_use(&self) -> Vec<u32> {
        if self.is_field(Dimension::Hour) {
            self.bundle.source.form.hours.clone()
        } else {
            self.selection.hour.into_iter().collect()
        }
    }

    fn element(&self, id: i64) -> Result<&ElementMetadata> {
        self.bundle
            .element(id)
            .ok_or_else(|| Error::form_config(format!("element {id} has no metadata")))
    }

    /// The selected value of a dimension that does not vary across fields.
    fn fixed_value(&self, dim: Dimension) -> Result<i64> {
        let value = match dim {
            Dimension::Element => self.selection.element_id,
            Dimension::Day => self.selection.day.map(i64::from),
            Dimension::Hour => self.selection.hour.map(i64::from),
        };
        value.ok_or_else(|| {
            Error::form_config(format!("{dim} is neither an entry field nor selected"))
        })
    }

    /// The points along a field dimension.
    ///
    /// Elements without metadata are left out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormConfig`] if the selected month is invalid.
    pub fn field_definitions(&self, dim: Dimension) -> Result<Vec<FieldDefinition>> {
        let form = &self.bundle.source.form;
        let defs = match dim {
            Dimension::Element => form
                .element_ids
                .iter()
                .filter_map(|id| self.bundle.element(*id))
                .map(|element| FieldDefinition {
                    id: element.id,
                    label: element.abbreviation.clone(),
                })
                .collect(),
            Dimension::Day => {
                let last = last_day_of_month(self.selection.year, self.selection.month)?;
                (1..=last).map(FieldDefinition::padded).collect()
            }
            Dimension::Hour => form.hours.iter().copied().map(FieldDefinition::padded).collect(),
        };
        Ok(defs)
    }

    /// The query for the records behind this form.
    ///
    /// Covers the selected day, or the whole month when the day varies,
    /// from 00:00 to 23:00 local time converted to UTC.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormConfig`] if the selected date is invalid.
    pub fn observation_query(&self) -> Result<EntryFormQuery> {
        let Selection { year, month, .. } = self.selection;

        let (first_day, last_day) = if self.is_field(Dimension::Day) {
            (1, last_day_of_month(year, month)?)
        } else {
            let day = u32::try_from(self.fixed_value(Dimension::Day)?)
                .map_err(|_| Error::form_config("day is out of range"))?;
            (day, day)
        };

        let element_ids = if self.is_field(Dimension::Element) {
            self.field_definitions(Dimension::Element)?
                .into_iter()
                .map(|def| def.id)
                .collect()
        } else {
            vec![self.fixed_value(Dimension::Element)?]
        };

        Ok(EntryFormQuery {
            station_id: self.bundle.station.id.clone(),
            source_id: self.bundle.source.id,
            level: FORM_LEVEL,
            element_ids,
            from_date: self.to_utc(date(year, month, first_day)?, FIRST_HOUR)?,
            to_date: self.to_utc(date(year, month, last_day)?, LAST_HOUR)?,
        })
    }

    /// Expand the form into slots, pairing each with a matching record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormConfig`] if a slot cannot be built.
    pub fn build_slots(&self, records: &[ObservationRecord]) -> Result<SlotLayout> {
        let existing: HashMap<CompositeKey, &ObservationRecord> =
            records.iter().map(|r| (r.key(), r)).collect();
        let form = &self.bundle.source.form;

        let layout = match form.layout {
            Layout::Linear => {
                let field = form.fields[0];
                let fields = self.field_definitions(field)?;
                let slots = fields
                    .iter()
                    .map(|def| self.slot(&[(field, def.id)], &existing))
                    .collect::<Result<Vec<_>>>()?;
                SlotLayout::Linear { fields, slots }
            }
            Layout::Grid => {
                let (row_dim, col_dim) = (form.fields[0], form.fields[1]);
                let rows = self.field_definitions(row_dim)?;
                let columns = self.field_definitions(col_dim)?;
                let slots = rows
                    .iter()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|col| {
                                self.slot(&[(row_dim, row.id), (col_dim, col.id)], &existing)
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?;
                SlotLayout::Grid {
                    rows,
                    columns,
                    slots,
                }
            }
        };

        debug!(
            "Built {} slots, {} matched existing records",
            layout.len(),
            layout.slots().iter().filter(|s| s.exists()).count()
        );
        Ok(layout)
    }

    /// Build one slot: field ids for the varying dimensions, selected values
    /// for the rest.
    fn slot(
        &self,
        assigned: &[(Dimension, i64)],
        existing: &HashMap<CompositeKey, &ObservationRecord>,
    ) -> Result<FormSlot> {
        let value_of = |dim: Dimension| -> Result<i64> {
            match assigned.iter().find(|(d, _)| *d == dim) {
                Some((_, id)) => Ok(*id),
                None => self.fixed_value(dim),
            }
        };
        let as_u32 = |dim: Dimension| -> Result<u32> {
            u32::try_from(value_of(dim)?)
                .map_err(|_| Error::form_config(format!("{dim} value is out of range")))
        };

        let element = self.element(value_of(Dimension::Element)?)?;
        let Selection { year, month, .. } = self.selection;
        let datetime = self.to_utc(date(year, month, as_u32(Dimension::Day)?)?, as_u32(Dimension::Hour)?)?;

        let source = &self.bundle.source;
        let key = CompositeKey {
            station_id: self.bundle.station.id.clone(),
            source_id: source.id,
            level: FORM_LEVEL,
            element_id: element.id,
            datetime,
            interval: source.interval(),
        };

        let (record, exists) = match existing.get(&key) {
            Some(record) => ((*record).clone(), true),
            None => (ObservationRecord::empty(key), false),
        };

        Ok(FormSlot::new(
            record,
            exists,
            element.entry_scale(source.scale_values),
            source.allow_missing_value,
            element.range_threshold,
        ))
    }

    /// Convert a local date and hour to UTC using the source's offset.
    fn to_utc(&self, date: NaiveDate, hour: u32) -> Result<DateTime<Utc>> {
        let local = date
            .and_hms_opt(hour, 0, 0)
            .ok_or_else(|| Error::form_config(format!("hour {hour} is out of range")))?;
        let offset = Duration::hours(i64::from(self.bundle.source.utc_offset));
        Ok(Utc.from_utc_datetime(&local) - offset)
    }
}

fn date(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| Error::form_config(format!("{year}-{month:02}-{day:02} is not a date")))
}

fn last_day_of_month(year: i32, month: u32) -> Result<u32> {
    let first = date(year, month, 1)?;
    let next = if month == 12 {
        date(year + 1, 1, 1)?
    } else {
        date(year, month + 1, 1)?
    };
    Ok((next - first).num_days().try_into().unwrap_or(first.day()))
}

/// A form loaded with its records and ready for input.
#[derive(Debug, Clone)]
pub struct FormEntry {
    definition: FormDefinition,
    layout: SlotLayout,
}

impl FormEntry {
    /// Fetch the form's records through the service and build its slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails with a server error or the slots
    /// cannot be built.
    pub async fn load(definition: FormDefinition, service: &ObservationService) -> Result<Self> {
        let query = definition.observation_query()?;
        let records = service.find_entry_form_data(&query).await?;
        let layout = definition.build_slots(&records)?;
        Ok(Self { definition, layout })
    }

    /// The form definition.
    #[must_use]
    pub fn definition(&self) -> &FormDefinition {
        &self.definition
    }

    /// The slots.
    #[must_use]
    pub fn layout(&self) -> &SlotLayout {
        &self.layout
    }

    /// Find the slot for a key.
    pub fn slot_mut(&mut self, key: &CompositeKey) -> Option<&mut FormSlot> {
        self.layout
            .slots_mut()
            .into_iter()
            .find(|slot| slot.record().has_key(key))
    }

    /// Records whose value, flag or comment was edited.
    #[must_use]
    pub fn changed_records(&self) -> Vec<ObservationRecord> {
        self.layout
            .slots()
            .into_iter()
            .filter(|slot| slot.changed())
            .map(|slot| slot.record().clone())
            .collect()
    }

    /// Save edited records.
    ///
    /// Returns `None` when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] if any slot holds invalid input, or
    /// the service's error if the save fails.
    pub async fn save(&mut self, service: &ObservationService) -> Result<Option<SaveOutcome>> {
        if let Some(slot) = self
            .layout
            .slots()
            .into_iter()
            .find(|slot| !slot.validation().is_valid())
        {
            let reason = slot
                .validation()
                .first_error()
                .map_or_else(String::new, ToString::to_string);
            return Err(Error::InvalidRecord {
                key: slot.key().to_string(),
                reason,
            });
        }

        let changed = self.changed_records();
        if changed.is_empty() {
            return Ok(None);
        }

        let outcome = service.save(&changed).await?;
        for slot in self.layout.slots_mut() {
            if slot.changed() {
                slot.mark_saved();
            }
        }
        Ok(Some(outcome))
    }
}
