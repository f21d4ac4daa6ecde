//! BUFR subsets to observation records.

use std::collections::HashMap;
use std::sync::Arc;

use bufr_parser::{BufrReader, BufrTables, Descriptor, Subset};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};
use wis2_common::{DataFormat, ObservationRecord, Point, RawIntakeEvent};

use crate::convert::{Converted, Converter};
use crate::error::ConversionError;

const BLOCK_NUMBER: Descriptor = Descriptor::new(0, 1, 1);
const STATION_NUMBER: Descriptor = Descriptor::new(0, 1, 2);
const WIGOS_SERIES: Descriptor = Descriptor::new(0, 1, 125);
const WIGOS_ISSUER: Descriptor = Descriptor::new(0, 1, 126);
const WIGOS_ISSUE_NUMBER: Descriptor = Descriptor::new(0, 1, 127);
const WIGOS_LOCAL_ID: Descriptor = Descriptor::new(0, 1, 128);

const YEAR: Descriptor = Descriptor::new(0, 4, 1);
const MONTH: Descriptor = Descriptor::new(0, 4, 2);
const DAY: Descriptor = Descriptor::new(0, 4, 3);
const HOUR: Descriptor = Descriptor::new(0, 4, 4);
const MINUTE: Descriptor = Descriptor::new(0, 4, 5);
const SECOND: Descriptor = Descriptor::new(0, 4, 6);

const LATITUDE: Descriptor = Descriptor::new(0, 5, 1);
const LONGITUDE: Descriptor = Descriptor::new(0, 6, 1);
const STATION_HEIGHT: Descriptor = Descriptor::new(0, 7, 30);

/// Issuer used for WIGOS identifiers derived from WMO block and station
/// numbers.
const WMO_ISSUER: u32 = 20000;

/// Decodes BUFR edition 3/4 messages with the configured tables.
#[derive(Debug, Clone)]
pub struct BufrConverter {
    tables: Arc<BufrTables>,
}

impl Default for BufrConverter {
    fn default() -> Self {
        Self::new(Arc::new(BufrTables::wmo_subset()))
    }
}

impl BufrConverter {
    pub fn new(tables: Arc<BufrTables>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &BufrTables {
        &self.tables
    }
}

/// Observed quantities live in classes 10 and up; class 31 holds
/// replication factors.
fn is_observation(descriptor: Descriptor) -> bool {
    descriptor.is_element() && descriptor.x >= 10 && descriptor.x != 31
}

/// WIGOS identifier of a subset, from the WIGOS sequence or else from the
/// WMO block and station numbers.
pub fn station_identifier(subset: &Subset) -> Option<String> {
    let local = subset.text(WIGOS_LOCAL_ID).filter(|s| !s.is_empty());
    if let (Some(series), Some(issuer), Some(issue), Some(local)) = (
        subset.numeric(WIGOS_SERIES),
        subset.numeric(WIGOS_ISSUER),
        subset.numeric(WIGOS_ISSUE_NUMBER),
        local,
    ) {
        return Some(format!("{}-{}-{}-{}", series as u32, issuer as u32, issue as u32, local));
    }

    let block = subset.numeric(BLOCK_NUMBER)?;
    let station = subset.numeric(STATION_NUMBER)?;
    Some(format!("0-{}-0-{:02}{:03}", WMO_ISSUER, block as u32, station as u32))
}

/// Observation time of a subset; fields not reported fall back to the
/// message's typical time.
pub fn observation_time(subset: &Subset, typical: DateTime<Utc>) -> Option<DateTime<Utc>> {
    use chrono::{Datelike, Timelike};

    let field = |d: Descriptor, fallback: u32| subset.numeric(d).map(|v| v as u32).unwrap_or(fallback);
    let year = subset.numeric(YEAR).map(|v| v as i32).unwrap_or_else(|| typical.year());

    Utc.with_ymd_and_hms(
        year,
        field(MONTH, typical.month()),
        field(DAY, typical.day()),
        field(HOUR, typical.hour()),
        field(MINUTE, typical.minute()),
        field(SECOND, 0),
    )
    .single()
}

fn station_location(subset: &Subset) -> Option<Point> {
    let lat = subset.numeric(LATITUDE)?;
    let lon = subset.numeric(LONGITUDE)?;
    Some(Point::new(lon, lat, subset.numeric(STATION_HEIGHT)))
}

fn subset_records(
    subset: &Subset,
    station_id: &str,
    phenomenon_time: DateTime<Utc>,
    result_time: DateTime<Utc>,
) -> Vec<ObservationRecord> {
    let geometry = station_location(subset);
    let mut occurrences: HashMap<&str, u32> = HashMap::new();
    let mut records = Vec::new();

    for element in subset.values.iter().filter(|e| is_observation(e.descriptor)) {
        let seen = occurrences.entry(element.name.as_str()).or_insert(0);
        let sequence_index = *seen;
        *seen += 1;

        let Some(value) = element.value.as_f64() else { continue };
        records.push(ObservationRecord {
            station_id: station_id.to_string(),
            phenomenon_time,
            result_time,
            parameter_name: element.name.clone(),
            value,
            units: element.units.clone(),
            geometry,
            sequence_index,
        });
    }
    records
}

impl Converter for BufrConverter {
    fn format(&self) -> DataFormat {
        DataFormat::Bufr
    }

    fn convert(&self, event: &RawIntakeEvent) -> Result<Converted, ConversionError> {
        let messages = BufrReader::new(event.content.clone()).read_all()?;
        if messages.is_empty() {
            return Err(ConversionError::Malformed("no BUFR message found".to_string()));
        }

        let mut converted = Converted::default();
        for (index, message) in messages.iter().enumerate() {
            let typical = message.identification.typical_time;
            let subsets = message.decode(&self.tables)?;
            debug!(
                source = %event.source_path,
                message = index,
                subsets = subsets.len(),
                "Decoded BUFR message"
            );

            for subset in &subsets {
                let Some(station_id) = station_identifier(subset) else {
                    warn!(source = %event.source_path, message = index, "Subset without station identification");
                    converted.skipped += 1;
                    continue;
                };
                let Some(phenomenon_time) = observation_time(subset, typical) else {
                    warn!(source = %event.source_path, station = %station_id, "Subset with invalid date");
                    converted.skipped += 1;
                    continue;
                };

                let records = subset_records(subset, &station_id, phenomenon_time, typical);
                if records.is_empty() {
                    debug!(station = %station_id, "Subset carries no observed values");
                    converted.skipped += 1;
                    continue;
                }
                converted.records.extend(records);
            }
        }

        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bufr_parser::{DecodedElement, Value};

    fn element(descriptor: Descriptor, name: &str, value: Value) -> DecodedElement {
        DecodedElement {
            descriptor,
            name: name.to_string(),
            units: "K".to_string(),
            value,
            replication: None,
        }
    }

    fn typical() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 12, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_wigos_identifier() {
        let subset = Subset {
            values: vec![
                element(WIGOS_SERIES, "s", Value::Numeric(0.0)),
                element(WIGOS_ISSUER, "i", Value::Numeric(454.0)),
                element(WIGOS_ISSUE_NUMBER, "n", Value::Numeric(2.0)),
                element(WIGOS_LOCAL_ID, "l", Value::Text("AWSCHIDOOLE".into())),
            ],
        };
        assert_eq!(station_identifier(&subset).as_deref(), Some("0-454-2-AWSCHIDOOLE"));
    }

    #[test]
    fn test_block_station_fallback() {
        let subset = Subset {
            values: vec![
                element(WIGOS_LOCAL_ID, "l", Value::Missing),
                element(BLOCK_NUMBER, "b", Value::Numeric(6.0)),
                element(STATION_NUMBER, "n", Value::Numeric(7.0)),
            ],
        };
        assert_eq!(station_identifier(&subset).as_deref(), Some("0-20000-0-06007"));
        assert!(station_identifier(&Subset::default()).is_none());
    }

    #[test]
    fn test_time_falls_back_to_typical() {
        let subset = Subset {
            values: vec![element(HOUR, "h", Value::Numeric(13.0)), element(MINUTE, "m", Value::Numeric(55.0))],
        };
        assert_eq!(
            observation_time(&subset, typical()),
            Some(Utc.with_ymd_and_hms(2022, 1, 12, 13, 55, 0).unwrap())
        );

        let bad = Subset {
            values: vec![element(MONTH, "m", Value::Numeric(13.0))],
        };
        assert!(observation_time(&bad, typical()).is_none());
    }

    #[test]
    fn test_sequence_index_counts_missing() {
        let temperature = Descriptor::new(0, 12, 101);
        let subset = Subset {
            values: vec![
                element(temperature, "air_temperature", Value::Missing),
                element(temperature, "air_temperature", Value::Numeric(290.0)),
                element(Descriptor::new(0, 31, 1), "factor", Value::Numeric(2.0)),
            ],
        };
        let records = subset_records(&subset, "s", typical(), typical());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence_index, 1);
        assert_eq!(records[0].value, 290.0);
    }
}
