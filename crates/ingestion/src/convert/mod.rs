//! Format converters.
//!
//! Each converter turns the bytes of one intake event into observation
//! records. [`ConverterSet`] dispatches on the detected format and stamps
//! the result into a [`DataObject`].

mod bufr_subsets;
mod csv_rows;

pub use bufr_subsets::{observation_time, station_identifier, BufrConverter};
pub use csv_rows::CsvConverter;

use metrics::counter;
use tracing::{debug, info};
use wis2_common::{DataFormat, DataObject, ObservationRecord, RawIntakeEvent};

use crate::error::ConversionError;
use crate::stamper;

/// Records produced from one input and the number of rows or subsets that
/// had to be dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Converted {
    pub records: Vec<ObservationRecord>,
    pub skipped: usize,
}

/// A converter for one input format.
///
/// Implementations are pure: the same bytes always give the same records.
pub trait Converter: Send + Sync {
    fn format(&self) -> DataFormat;

    fn convert(&self, event: &RawIntakeEvent) -> Result<Converted, ConversionError>;
}

/// All configured converters.
#[derive(Debug, Clone, Default)]
pub struct ConverterSet {
    csv: CsvConverter,
    bufr: BufrConverter,
}

impl ConverterSet {
    pub fn new(csv: CsvConverter, bufr: BufrConverter) -> Self {
        Self { csv, bufr }
    }

    fn converter(&self, format: DataFormat) -> &dyn Converter {
        match format {
            DataFormat::Csv => &self.csv,
            DataFormat::Bufr => &self.bufr,
        }
    }

    /// Convert an intake event into a stamped data object.
    pub fn convert(&self, event: &RawIntakeEvent) -> Result<DataObject, ConversionError> {
        let converter = self.converter(event.format);
        let Converted { records, skipped } = converter.convert(event)?;

        if skipped > 0 {
            counter!("wis2_rows_skipped_total", "format" => event.format.as_str())
                .increment(skipped as u64);
        }
        debug!(
            source = %event.source_path,
            format = event.format.as_str(),
            records = records.len(),
            skipped,
            "Converted intake event"
        );

        let object = stamper::stamp(event, records, skipped)?;
        info!(
            source = %event.source_path,
            hash = %object.content_hash,
            records = object.len(),
            "Stamped data object"
        );
        Ok(object)
    }
}
