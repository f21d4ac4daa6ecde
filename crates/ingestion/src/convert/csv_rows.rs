//! CSV to observation records.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};
use wis2_common::{parse_timestamp, DataFormat, ObservationRecord, Point, RawIntakeEvent};

use crate::convert::{Converted, Converter};
use crate::error::ConversionError;
use crate::mappings::{ColumnMapping, CsvMapping, DataMappings};

/// Converts delimited text using the mapping of the file's directory.
#[derive(Debug, Clone, Default)]
pub struct CsvConverter {
    mappings: DataMappings,
}

/// Why a row was dropped.
#[derive(Error, Debug, PartialEq)]
enum RowError {
    #[error("no station identifier")]
    MissingStation,
    #[error("unparseable time '{0}'")]
    BadTime(String),
    #[error("column {column}: '{cell}' is not a finite number")]
    BadValue { column: String, cell: String },
}

struct Columns<'m> {
    station: usize,
    time: usize,
    result_time: Option<usize>,
    longitude: Option<usize>,
    latitude: Option<usize>,
    elevation: Option<usize>,
    measured: Vec<(usize, &'m str, &'m str)>,
}

impl CsvConverter {
    pub fn new(mappings: DataMappings) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> &DataMappings {
        &self.mappings
    }

    fn resolve_columns<'m>(
        mapping: &'m CsvMapping,
        headers: &'m csv::StringRecord,
    ) -> Result<Columns<'m>, ConversionError> {
        let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();
        let required = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| ConversionError::Malformed(format!("missing column '{}'", name)))
        };
        let optional = |name: &Option<String>| name.as_deref().and_then(|n| index.get(n).copied());

        let measured = if mapping.columns.is_empty() {
            let context = mapping.context_columns();
            headers
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.is_empty() && !context.contains(h))
                .map(|(i, h)| (i, h, ""))
                .collect()
        } else {
            mapping
                .columns
                .iter()
                .filter_map(|c: &ColumnMapping| match index.get(c.column.as_str()) {
                    Some(i) => Some((*i, c.parameter_name(), c.units.as_str())),
                    None => {
                        debug!(column = %c.column, "Mapped column absent from file");
                        None
                    }
                })
                .collect()
        };

        Ok(Columns {
            station: required(&mapping.station)?,
            time: required(&mapping.time)?,
            result_time: optional(&mapping.result_time),
            longitude: optional(&mapping.longitude),
            latitude: optional(&mapping.latitude),
            elevation: optional(&mapping.elevation),
            measured,
        })
    }

    fn convert_row(
        mapping: &CsvMapping,
        columns: &Columns<'_>,
        row: &csv::StringRecord,
    ) -> Result<Vec<ObservationRecord>, RowError> {
        let cell = |i: usize| row.get(i).map(str::trim).filter(|c| !mapping.is_missing(c));
        let number = |i: Option<usize>| {
            i.and_then(cell)
                .and_then(|c| c.parse::<f64>().ok())
                .filter(|v| v.is_finite())
        };

        let station_id = cell(columns.station).ok_or(RowError::MissingStation)?;
        let time_cell = cell(columns.time).ok_or_else(|| RowError::BadTime(String::new()))?;
        let phenomenon_time =
            parse_timestamp(time_cell).map_err(|_| RowError::BadTime(time_cell.to_string()))?;
        let result_time = columns
            .result_time
            .and_then(cell)
            .and_then(|c| parse_timestamp(c).ok())
            .unwrap_or(phenomenon_time);

        let geometry = match (number(columns.longitude), number(columns.latitude)) {
            (Some(lon), Some(lat)) => Some(Point::new(lon, lat, number(columns.elevation))),
            _ => None,
        };

        let mut records = Vec::with_capacity(columns.measured.len());
        for (i, parameter, units) in &columns.measured {
            let Some(raw) = cell(*i) else { continue };
            let value = raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| RowError::BadValue {
                    column: parameter.to_string(),
                    cell: raw.to_string(),
                })?;

            records.push(ObservationRecord {
                station_id: station_id.to_string(),
                phenomenon_time,
                result_time,
                parameter_name: parameter.to_string(),
                value,
                units: units.to_string(),
                geometry,
                sequence_index: 0,
            });
        }
        Ok(records)
    }
}

impl Converter for CsvConverter {
    fn format(&self) -> DataFormat {
        DataFormat::Csv
    }

    fn convert(&self, event: &RawIntakeEvent) -> Result<Converted, ConversionError> {
        let mapping = self.mappings.mapping_for(&event.source_path);
        let delimiter = u8::try_from(mapping.delimiter)
            .map_err(|_| ConversionError::Malformed(format!("unusable delimiter {:?}", mapping.delimiter)))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .delimiter(delimiter)
            .from_reader(event.content.as_ref());

        let headers = reader
            .headers()
            .map_err(|e| ConversionError::Malformed(format!("unreadable header: {}", e)))?
            .clone();
        let columns = Self::resolve_columns(mapping, &headers)?;

        let mut converted = Converted::default();
        for (line, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(source = %event.source_path, line = line + 2, error = %e, "Unreadable CSV row");
                    converted.skipped += 1;
                    continue;
                }
            };

            match Self::convert_row(mapping, &columns, &row) {
                Ok(records) => converted.records.extend(records),
                Err(reason) => {
                    debug!(source = %event.source_path, line = line + 2, %reason, "Skipping CSV row");
                    converted.skipped += 1;
                }
            }
        }

        Ok(converted)
    }
}
