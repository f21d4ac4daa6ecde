//! Identity and integrity stamping.
//!
//! Records are put in canonical order and serialized as a GeoJSON
//! FeatureCollection. The SHA-256 of those bytes is the content hash (and
//! notification id); the SHA-512 is published as the integrity value.

use std::cmp::Ordering;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};
use tracing::warn;
use wis2_common::{format_timestamp, DataObject, Integrity, ObservationRecord, Point, RawIntakeEvent};

use crate::error::ConversionError;

pub const INTEGRITY_METHOD: &str = "sha512";

/// Identity of a record: hash of station, phenomenon time, parameter and
/// sequence index.
pub fn record_identity(record: &ObservationRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.station_id.as_bytes());
    hasher.update([0]);
    hasher.update(format_timestamp(&record.phenomenon_time).as_bytes());
    hasher.update([0]);
    hasher.update(record.parameter_name.as_bytes());
    hasher.update([0]);
    hasher.update(record.sequence_index.to_be_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_order(a: &ObservationRecord, b: &ObservationRecord) -> Ordering {
    a.station_id
        .cmp(&b.station_id)
        .then_with(|| a.phenomenon_time.cmp(&b.phenomenon_time))
        .then_with(|| a.parameter_name.cmp(&b.parameter_name))
        .then_with(|| a.sequence_index.cmp(&b.sequence_index))
        .then_with(|| a.value.total_cmp(&b.value))
        .then_with(|| a.units.cmp(&b.units))
        .then_with(|| a.result_time.cmp(&b.result_time))
        .then_with(|| compare_geometry(a.geometry.as_ref(), b.geometry.as_ref()))
}

fn compare_geometry(a: Option<&Point>, b: Option<&Point>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a
            .lon
            .total_cmp(&b.lon)
            .then_with(|| a.lat.total_cmp(&b.lat))
            .then_with(|| match (a.elevation, b.elevation) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (x, y) => x.is_some().cmp(&y.is_some()),
            }),
    }
}

/// Sort records canonically and drop exact duplicates.
pub fn canonicalize(mut records: Vec<ObservationRecord>) -> Vec<ObservationRecord> {
    records.sort_by(canonical_order);
    records.dedup();

    for pair in records.windows(2) {
        if record_identity(&pair[0]) == record_identity(&pair[1]) {
            warn!(
                station = %pair[0].station_id,
                parameter = %pair[0].parameter_name,
                sequence = pair[0].sequence_index,
                "Conflicting values for one record identity"
            );
        }
    }
    records
}

#[derive(Serialize)]
struct FeatureCollection<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<Feature<'a>>,
}

#[derive(Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: String,
    geometry: Option<PointGeometry>,
    properties: FeatureProperties<'a>,
}

#[derive(Serialize)]
struct PointGeometry {
    #[serde(rename = "type")]
    kind: &'static str,
    coordinates: Vec<f64>,
}

#[derive(Serialize)]
struct FeatureProperties<'a> {
    wigos_station_identifier: &'a str,
    #[serde(rename = "phenomenonTime")]
    phenomenon_time: String,
    #[serde(rename = "resultTime")]
    result_time: String,
    name: &'a str,
    value: f64,
    units: &'a str,
    index: u32,
}

/// Canonical serialization of an already ordered record set.
pub fn canonical_bytes(records: &[ObservationRecord]) -> Result<Vec<u8>, ConversionError> {
    let collection = FeatureCollection {
        kind: "FeatureCollection",
        features: records
            .iter()
            .map(|r| Feature {
                kind: "Feature",
                id: r.feature_id(),
                geometry: r.geometry.as_ref().map(|p| PointGeometry {
                    kind: "Point",
                    coordinates: p.coordinates(),
                }),
                properties: FeatureProperties {
                    wigos_station_identifier: &r.station_id,
                    phenomenon_time: format_timestamp(&r.phenomenon_time),
                    result_time: format_timestamp(&r.result_time),
                    name: &r.parameter_name,
                    value: r.value,
                    units: &r.units,
                    index: r.sequence_index,
                },
            })
            .collect(),
    };

    serde_json::to_vec(&collection).map_err(|e| ConversionError::Malformed(e.to_string()))
}

/// Stamp the records converted from one intake event into a data object.
///
/// Identical record sets yield identical hashes whatever their input order.
pub fn stamp(
    source: &RawIntakeEvent,
    group: Vec<ObservationRecord>,
    skipped: usize,
) -> Result<DataObject, ConversionError> {
    let records = canonicalize(group);
    if records.is_empty() {
        return Err(ConversionError::EmptyResult { skipped });
    }

    let bytes = canonical_bytes(&records)?;
    let content_hash = hex::encode(Sha256::digest(&bytes));
    let integrity = Integrity {
        method: INTEGRITY_METHOD.to_string(),
        value: STANDARD.encode(Sha512::digest(&bytes)),
    };

    Ok(DataObject {
        source_path: source.source_path.clone(),
        format: source.format,
        records,
        content_hash,
        integrity,
        canonical_bytes: Bytes::from(bytes),
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wis2_common::{DataFormat, Point};

    fn record(station: &str, minute: u32, parameter: &str, value: f64) -> ObservationRecord {
        let t = Utc.with_ymd_and_hms(2022, 1, 12, 13, minute, 0).unwrap();
        ObservationRecord {
            station_id: station.to_string(),
            phenomenon_time: t,
            result_time: t,
            parameter_name: parameter.to_string(),
            value,
            units: "Celsius".to_string(),
            geometry: Some(Point::new(33.78, -13.97, None)),
            sequence_index: 0,
        }
    }

    fn event() -> RawIntakeEvent {
        RawIntakeEvent::new("incoming/a.csv", Bytes::new(), DataFormat::Csv)
    }

    #[test]
    fn test_order_independent_hash() {
        let a = vec![record("s1", 55, "t", 1.0), record("s2", 50, "t", 2.0), record("s1", 50, "p", 3.0)];
        let mut b = a.clone();
        b.reverse();

        let x = stamp(&event(), a, 0).unwrap();
        let y = stamp(&event(), b, 0).unwrap();
        assert_eq!(x.content_hash, y.content_hash);
        assert_eq!(x.integrity, y.integrity);
        assert_eq!(x.records[0].station_id, "s1");
        assert_eq!(x.records[0].parameter_name, "p");
    }

    #[test]
    fn test_geometry_breaks_ties() {
        let mut here = record("s1", 55, "t", 1.0);
        here.geometry = Some(Point::new(33.0, -14.0, None));
        let mut there = record("s1", 55, "t", 1.0);
        there.geometry = Some(Point::new(34.0, -13.0, Some(1160.0)));
        let mut nowhere = record("s1", 55, "t", 1.0);
        nowhere.geometry = None;

        let forward = vec![here.clone(), there.clone(), nowhere.clone()];
        let backward = vec![nowhere, there, here];

        let x = stamp(&event(), forward, 0).unwrap();
        let y = stamp(&event(), backward, 0).unwrap();
        assert_eq!(x.len(), 3);
        assert_eq!(x.content_hash, y.content_hash);
        assert!(x.records[0].geometry.is_none());
    }

    #[test]
    fn test_value_changes_hash() {
        let x = stamp(&event(), vec![record("s1", 55, "t", 1.0)], 0).unwrap();
        let y = stamp(&event(), vec![record("s1", 55, "t", 1.5)], 0).unwrap();
        assert_ne!(x.content_hash, y.content_hash);
        assert_eq!(x.content_hash.len(), 64);
    }

    #[test]
    fn test_exact_duplicates_collapse() {
        let object = stamp(
            &event(),
            vec![record("s1", 55, "t", 1.0), record("s1", 55, "t", 1.0)],
            0,
        )
        .unwrap();
        assert_eq!(object.len(), 1);
    }

    #[test]
    fn test_empty_group() {
        assert_eq!(
            stamp(&event(), Vec::new(), 3).unwrap_err(),
            ConversionError::EmptyResult { skipped: 3 }
        );
    }

    #[test]
    fn test_canonical_bytes_shape() {
        let object = stamp(&event(), vec![record("0-454-2-AWSCHIDOOLE", 55, "air_temperature", 24.85)], 0)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&object.canonical_bytes).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        let feature = &json["features"][0];
        assert_eq!(feature["id"], "WIGOS_0-454-2-AWSCHIDOOLE_20220112T135500-0-air_temperature");
        assert_eq!(feature["properties"]["phenomenonTime"], "2022-01-12T13:55:00Z");
        assert_eq!(feature["properties"]["value"], 24.85);
        assert_eq!(feature["geometry"]["coordinates"][0], 33.78);
    }

    #[test]
    fn test_record_identity_ignores_value() {
        let a = record("s1", 55, "t", 1.0);
        let b = record("s1", 55, "t", 2.0);
        assert_eq!(record_identity(&a), record_identity(&b));
        let mut c = a.clone();
        c.sequence_index = 1;
        assert_ne!(record_identity(&a), record_identity(&c));
    }
}
