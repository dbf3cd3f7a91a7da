//! Read-only metadata consumed by the form generator and validator.
//!
//! Metadata is managed elsewhere; this crate only deserializes it. A
//! [`MetadataBundle`] groups what one entry form needs and can be loaded from
//! a JSON file for the command-line tools.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{EntryScale, RangeThreshold};
use crate::error::Result;
use crate::form::FormMetadata;

/// An observed element, e.g. maximum temperature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementMetadata {
    /// Element identifier.
    pub id: i64,
    /// Short label shown as a column or row header.
    pub abbreviation: String,
    /// Full element name.
    #[serde(default)]
    pub name: Option<String>,
    /// Multiplier between stored and typed values when the source scales.
    #[serde(default)]
    pub entry_scale_factor: Option<f64>,
    /// Plausibility limits used for range warnings.
    #[serde(default)]
    pub range_threshold: Option<RangeThreshold>,
}

impl ElementMetadata {
    /// Resolve how values of this element are typed for a source.
    #[must_use]
    pub fn entry_scale(&self, scale_values: bool) -> EntryScale {
        EntryScale::for_element(scale_values, self.entry_scale_factor)
    }
}

/// A data-entry form template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTemplate {
    /// Source identifier.
    pub id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Whether the missing flag may be entered.
    pub allow_missing_value: bool,
    /// Hours the form's local time is ahead of UTC.
    #[serde(default)]
    pub utc_offset: i32,
    /// Whether values are typed as scaled integers.
    #[serde(default)]
    pub scale_values: bool,
    /// Layout of the entry form.
    pub form: FormMetadata,
}

impl SourceTemplate {
    /// Observation interval in minutes for records entered on this form.
    #[must_use]
    pub fn interval(&self) -> i64 {
        self.form.interval
    }
}

/// Geographic position of a station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

/// An observing station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    /// Station identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Position, when known.
    #[serde(default)]
    pub location: Option<Location>,
}

/// Everything an entry form needs besides the observations themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBundle {
    /// The station data is entered for.
    pub station: Station,
    /// The form template.
    pub source: SourceTemplate,
    /// Metadata for the form's elements.
    pub elements: Vec<ElementMetadata>,
}

impl MetadataBundle {
    /// Load a bundle from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Look up an element by id.
    #[must_use]
    pub fn element(&self, id: i64) -> Option<&ElementMetadata> {
        self.elements.iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::form::{Dimension, Layout};

    pub(crate) fn sample_bundle_json() -> &'static str {
        r#"{
            "station": { "id": "ST001", "name": "Dagoretti", "location": { "latitude": -1.3, "longitude": 36.75 } },
            "source": {
                "id": 1,
                "name": "Synoptic daily",
                "allowMissingValue": true,
                "utcOffset": 3,
                "scaleValues": true,
                "form": {
                    "selectors": ["DAY", "HOUR"],
                    "fields": ["ELEMENT"],
                    "layout": "LINEAR",
                    "elementIds": [1, 2],
                    "hours": [6, 9],
                    "interval": 1440
                }
            },
            "elements": [
                { "id": 1, "abbreviation": "TMAX", "entryScaleFactor": 10,
                  "rangeThreshold": { "lowerThreshold": -10, "upperThreshold": 45 } },
                { "id": 2, "abbreviation": "RAIN" }
            ]
        }"#
    }

    #[test]
    fn test_bundle_deserializes_camel_case() {
        let bundle: MetadataBundle = serde_json::from_str(sample_bundle_json()).unwrap();

        assert_eq!(bundle.station.id, "ST001");
        assert_eq!(bundle.source.utc_offset, 3);
        assert_eq!(bundle.source.interval(), 1440);
        assert_eq!(bundle.source.form.layout, Layout::Linear);
        assert_eq!(bundle.source.form.fields, vec![Dimension::Element]);
        assert_eq!(bundle.elements.len(), 2);
        assert_eq!(
            bundle.element(1).and_then(|e| e.range_threshold),
            Some(RangeThreshold {
                lower_threshold: -10.0,
                upper_threshold: 45.0
            })
        );
        assert!(bundle.element(3).is_none());
    }

    #[test]
    fn test_entry_scale_follows_source_flag() {
        let bundle: MetadataBundle = serde_json::from_str(sample_bundle_json()).unwrap();
        let tmax = bundle.element(1).unwrap();
        let rain = bundle.element(2).unwrap();

        assert_eq!(tmax.entry_scale(true), EntryScale::Factor(10.0));
        assert_eq!(tmax.entry_scale(false), EntryScale::Unscaled);
        assert_eq!(rain.entry_scale(true), EntryScale::Factor(1.0));
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!(
            "stationsync_bundle_test_{}.json",
            std::process::id()
        ));
        std::fs::write(&path, sample_bundle_json()).unwrap();

        let bundle = MetadataBundle::from_json_file(&path).unwrap();
        assert_eq!(bundle.source.id, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_from_json_file_missing() {
        assert!(MetadataBundle::from_json_file("/nonexistent/bundle.json").is_err());
    }
}
