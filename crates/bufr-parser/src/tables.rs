//! BUFR element (Table B) and sequence (Table D) lookup tables.
//!
//! A built-in subset covers surface synoptic and upper-air reports;
//! further entries are loaded from YAML reference files so tables can be
//! extended without code changes.

use std::collections::HashMap;

use serde::Deserialize;

use crate::descriptor::Descriptor;
use crate::BufrError;

/// Units string marking character data.
pub const CCITT_IA5: &str = "CCITT IA5";

/// Table B entry describing how one element is packed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ElementEntry {
    pub name: String,
    pub units: String,
    pub scale: i32,
    pub reference: i64,
    /// Data width in bits
    pub width: usize,
}

impl ElementEntry {
    pub fn is_text(&self) -> bool {
        self.units == CCITT_IA5
    }
}

/// Element and sequence tables used to expand and decode descriptors.
#[derive(Debug, Clone, Default)]
pub struct BufrTables {
    elements: HashMap<Descriptor, ElementEntry>,
    sequences: HashMap<Descriptor, Vec<Descriptor>>,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    elements: Vec<ElementRow>,
    #[serde(default)]
    sequences: Vec<SequenceRow>,
}

#[derive(Debug, Deserialize)]
struct ElementRow {
    descriptor: Descriptor,
    #[serde(flatten)]
    entry: ElementEntry,
}

#[derive(Debug, Deserialize)]
struct SequenceRow {
    descriptor: Descriptor,
    members: Vec<Descriptor>,
}

impl BufrTables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables holding the built-in WMO subset.
    pub fn wmo_subset() -> Self {
        let mut tables = Self::new();

        let elements: &[(&str, &str, &str, i32, i64, usize)] = &[
            // Identification
            ("001001", "block_number", "Numeric", 0, 0, 7),
            ("001002", "station_number", "Numeric", 0, 0, 10),
            ("001015", "station_name", CCITT_IA5, 0, 0, 160),
            ("001125", "wigos_identifier_series", "Numeric", 0, 0, 4),
            ("001126", "wigos_issuer_of_identifier", "Numeric", 0, 0, 16),
            ("001127", "wigos_issue_number", "Numeric", 0, 0, 16),
            ("001128", "wigos_local_identifier", CCITT_IA5, 0, 0, 128),
            // Time
            ("004001", "year", "a", 0, 0, 12),
            ("004002", "month", "mon", 0, 0, 4),
            ("004003", "day", "d", 0, 0, 6),
            ("004004", "hour", "h", 0, 0, 5),
            ("004005", "minute", "min", 0, 0, 6),
            ("004006", "second", "s", 0, 0, 6),
            // Location
            ("005001", "latitude", "deg", 5, -9_000_000, 25),
            ("006001", "longitude", "deg", 5, -18_000_000, 26),
            ("007030", "height_of_station_ground_above_msl", "m", 1, -4000, 17),
            ("007031", "height_of_barometer_above_msl", "m", 1, -4000, 17),
            ("007004", "pressure_level", "Pa", -1, 0, 14),
            ("007032", "height_of_sensor_above_local_ground", "m", 2, 0, 16),
            ("008042", "extended_vertical_sounding_significance", "Flag table", 0, 0, 18),
            // Observations
            ("010004", "pressure", "Pa", -1, 0, 14),
            ("010051", "pressure_reduced_to_msl", "Pa", -1, 0, 14),
            ("010009", "geopotential_height", "gpm", 0, -1000, 17),
            ("011001", "wind_direction", "deg", 0, 0, 9),
            ("011002", "wind_speed", "m s-1", 1, 0, 12),
            ("011041", "maximum_wind_gust_speed", "m s-1", 1, 0, 12),
            ("012101", "air_temperature", "K", 2, 0, 16),
            ("012103", "dewpoint_temperature", "K", 2, 0, 16),
            ("013003", "relative_humidity", "%", 0, 0, 7),
            ("013011", "total_precipitation", "kg m-2", 1, -1, 14),
            ("020001", "horizontal_visibility", "m", -1, 0, 13),
            ("020010", "cloud_cover_total", "%", 0, 0, 7),
            // Replication factors
            ("031001", "delayed_descriptor_replication_factor", "Numeric", 0, 0, 8),
            ("031002", "extended_delayed_descriptor_replication_factor", "Numeric", 0, 0, 16),
        ];

        for (code, name, units, scale, reference, width) in elements {
            // The literals above are well-formed descriptors.
            if let Ok(descriptor) = code.parse() {
                tables.add_element(
                    descriptor,
                    ElementEntry {
                        name: name.to_string(),
                        units: units.to_string(),
                        scale: *scale,
                        reference: *reference,
                        width: *width,
                    },
                );
            }
        }

        let sequences: &[(&str, &[&str])] = &[
            ("301011", &["004001", "004002", "004003"]),
            ("301012", &["004004", "004005"]),
            ("301013", &["004004", "004005", "004006"]),
            ("301021", &["005001", "006001"]),
            ("301001", &["001001", "001002"]),
            ("301150", &["001125", "001126", "001127", "001128"]),
        ];

        for (code, members) in sequences {
            let parsed: Result<Vec<Descriptor>, _> = members.iter().map(|m| m.parse()).collect();
            if let (Ok(descriptor), Ok(members)) = (code.parse(), parsed) {
                tables.add_sequence(descriptor, members);
            }
        }

        tables
    }

    /// Add an element definition, replacing any previous one.
    pub fn add_element(&mut self, descriptor: Descriptor, entry: ElementEntry) {
        self.elements.insert(descriptor, entry);
    }

    /// Add a sequence expansion, replacing any previous one.
    pub fn add_sequence(&mut self, descriptor: Descriptor, members: Vec<Descriptor>) {
        self.sequences.insert(descriptor, members);
    }

    /// Merge entries from a YAML reference file.
    pub fn extend_from_yaml(&mut self, yaml: &str) -> Result<(), BufrError> {
        let file: TableFile =
            serde_yaml::from_str(yaml).map_err(|e| BufrError::InvalidTable(e.to_string()))?;

        for row in file.elements {
            if row.descriptor.f != 0 {
                return Err(BufrError::InvalidTable(format!(
                    "element {} must have F=0",
                    row.descriptor
                )));
            }
            if row.entry.width == 0 || (!row.entry.is_text() && row.entry.width > 64) {
                return Err(BufrError::InvalidTable(format!(
                    "element {} has unsupported width {}",
                    row.descriptor, row.entry.width
                )));
            }
            self.add_element(row.descriptor, row.entry);
        }
        for row in file.sequences {
            if row.descriptor.f != 3 {
                return Err(BufrError::InvalidTable(format!(
                    "sequence {} must have F=3",
                    row.descriptor
                )));
            }
            self.add_sequence(row.descriptor, row.members);
        }
        Ok(())
    }

    pub fn element(&self, descriptor: Descriptor) -> Option<&ElementEntry> {
        self.elements.get(&descriptor)
    }

    pub fn sequence(&self, descriptor: Descriptor) -> Option<&[Descriptor]> {
        self.sequences.get(&descriptor).map(Vec::as_slice)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let tables = BufrTables::wmo_subset();
        let temp = tables.element(Descriptor::new(0, 12, 101)).unwrap();
        assert_eq!(temp.name, "air_temperature");
        assert_eq!(temp.units, "K");
        assert_eq!(temp.width, 16);

        let wigos = tables.sequence(Descriptor::new(3, 1, 150)).unwrap();
        assert_eq!(wigos.len(), 4);
        assert!(tables.element(Descriptor::new(0, 63, 255)).is_none());
    }

    #[test]
    fn test_extend_from_yaml() {
        let mut tables = BufrTables::new();
        tables
            .extend_from_yaml(
                r#"
elements:
  - descriptor: "0-12-001"
    name: air_temperature_legacy
    units: K
    scale: 1
    reference: 0
    width: 12
sequences:
  - descriptor: "302099"
    members: ["012001"]
"#,
            )
            .unwrap();

        assert_eq!(tables.element_count(), 1);
        assert_eq!(tables.sequence_count(), 1);
        assert_eq!(
            tables.element(Descriptor::new(0, 12, 1)).unwrap().scale,
            1
        );
    }

    #[test]
    fn test_extend_rejects_bad_class() {
        let mut tables = BufrTables::new();
        let result = tables.extend_from_yaml(
            r#"
sequences:
  - descriptor: "012001"
    members: ["012001"]
"#,
        );
        assert!(matches!(result, Err(BufrError::InvalidTable(_))));
    }
}
