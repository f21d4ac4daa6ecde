//! CSV column mappings.
//!
//! ```yaml
//! default:
//!   station: station
//!   time: time
//!   columns:
//!     - column: air_temperature
//!       units: Celsius
//! overrides:
//!   synop_hourly:
//!     station: wsi
//!     time: obs_time
//!     longitude: lon
//!     latitude: lat
//!     columns:
//!       - { column: TA, parameter: air_temperature, units: Celsius }
//! ```
//!
//! Overrides are keyed by the name of the intake sub-directory a file
//! arrives in.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{IngestionError, Result};

/// One measured column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnMapping {
    pub column: String,
    /// Parameter name, defaults to the column name
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub units: String,
}

impl ColumnMapping {
    pub fn parameter_name(&self) -> &str {
        self.parameter.as_deref().unwrap_or(&self.column)
    }
}

/// How the columns of one CSV layout map onto observation records.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CsvMapping {
    pub station: String,
    pub time: String,
    pub result_time: Option<String>,
    pub longitude: Option<String>,
    pub latitude: Option<String>,
    pub elevation: Option<String>,
    /// Measured columns. When empty, every column not used above is taken
    /// as a parameter without units.
    pub columns: Vec<ColumnMapping>,
    /// Cell values meaning "no value"; the empty cell always does
    pub missing: Vec<String>,
    pub delimiter: char,
}

impl Default for CsvMapping {
    fn default() -> Self {
        Self {
            station: "station".to_string(),
            time: "time".to_string(),
            result_time: None,
            longitude: None,
            latitude: None,
            elevation: None,
            columns: Vec::new(),
            missing: Vec::new(),
            delimiter: ',',
        }
    }
}

impl CsvMapping {
    /// Whether a (trimmed) cell carries no value.
    pub fn is_missing(&self, cell: &str) -> bool {
        cell.is_empty() || self.missing.iter().any(|token| token == cell)
    }

    /// Columns holding context rather than measurements.
    pub fn context_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.station.as_str(), self.time.as_str()];
        columns.extend(
            [&self.result_time, &self.longitude, &self.latitude, &self.elevation]
                .into_iter()
                .flatten()
                .map(String::as_str),
        );
        columns
    }
}

/// The default mapping plus per-directory overrides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DataMappings {
    pub default: CsvMapping,
    pub overrides: HashMap<String, CsvMapping>,
}

impl DataMappings {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| IngestionError::Mappings(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Mapping for a file, chosen by its parent directory name.
    pub fn mapping_for(&self, source_path: &str) -> &CsvMapping {
        Path::new(source_path)
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .and_then(|name| self.overrides.get(name))
            .unwrap_or(&self.default)
    }
}
