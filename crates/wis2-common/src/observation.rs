//! Intake events and observation records.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Wis2Error;
use crate::geometry::Point;

/// Raw payload formats accepted at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Delimited text, one observation row per line
    Csv,
    /// WMO FM 94 BUFR binary messages
    Bufr,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Bufr => "bufr",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = Wis2Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "bufr" | "bufr4" => Ok(Self::Bufr),
            other => Err(Wis2Error::UnknownFormat(other.to_string())),
        }
    }
}

/// A file handed over by the intake watcher. Consumed once by conversion.
#[derive(Debug, Clone)]
pub struct RawIntakeEvent {
    pub source_path: String,
    pub received_at: DateTime<Utc>,
    pub content: Bytes,
    pub format: DataFormat,
}

impl RawIntakeEvent {
    pub fn new(source_path: impl Into<String>, content: Bytes, format: DataFormat) -> Self {
        Self {
            source_path: source_path.into(),
            received_at: Utc::now(),
            content,
            format,
        }
    }
}

/// One observed parameter value at one station and time.
///
/// Records are immutable once produced; missing values never become records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// WIGOS station identifier (e.g. `0-454-2-AWSCHIDOOLE`)
    pub station_id: String,
    pub phenomenon_time: DateTime<Utc>,
    pub result_time: DateTime<Utc>,
    pub parameter_name: String,
    pub value: f64,
    pub units: String,
    pub geometry: Option<Point>,
    /// Repetition counter keeping repeated parameters (levels) distinct
    pub sequence_index: u32,
}

impl ObservationRecord {
    /// Report identifier shared by every record of one station at one time.
    pub fn report_id(&self) -> String {
        format!(
            "WIGOS_{}_{}",
            self.station_id,
            self.phenomenon_time.format("%Y%m%dT%H%M%S")
        )
    }

    /// Feature identifier, unique per record identity.
    pub fn feature_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.report_id(),
            self.sequence_index,
            self.parameter_name
        )
    }
}
