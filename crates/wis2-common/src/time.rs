//! Time handling utilities for observation data.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Wis2Error;

/// Parse an ISO 8601 timestamp, assuming UTC when no offset is given.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, Wis2Error> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, pattern) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(Wis2Error::InvalidTime(s.to_string()))
}

/// Canonical second-resolution UTC rendering (`2022-01-12T13:55:00Z`).
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Temporal extent of a data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalExtent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TemporalExtent {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Smallest extent containing every given instant.
    pub fn enclosing<I>(times: I) -> Option<Self>
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        times.into_iter().fold(None, |extent, t| match extent {
            None => Some(Self::new(t, t)),
            Some(e) => Some(Self::new(e.start.min(t), e.end.max(t))),
        })
    }

    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt <= &self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_timestamp("2022-01-12T13:55:00Z").unwrap();
        assert_eq!(dt.year(), 2022);
        assert_eq!(dt.hour(), 13);
        assert_eq!(dt.minute(), 55);
    }

    #[test]
    fn test_parse_naive_assumes_utc() {
        let dt = parse_timestamp("2022-01-12 13:55:00").unwrap();
        assert_eq!(format_timestamp(&dt), "2022-01-12T13:55:00Z");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_extent() {
        let a = parse_timestamp("2022-01-12T13:55:00Z").unwrap();
        let b = parse_timestamp("2022-01-12T12:00:00Z").unwrap();
        let extent = TemporalExtent::enclosing([a, b]).unwrap();
        assert_eq!(extent.start, b);
        assert_eq!(extent.end, a);
        assert!(!extent.is_instant());
        assert!(TemporalExtent::enclosing(Vec::new()).is_none());
    }
}
