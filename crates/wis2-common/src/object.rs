//! Data objects: the unit of notification.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use crate::geometry::Point;
use crate::notification::Integrity;
use crate::observation::{DataFormat, ObservationRecord};
use crate::station::StationMetadata;
use crate::time::TemporalExtent;
use crate::topic::TopicHierarchy;

/// Records converted from one intake event, in canonical order, with the
/// content hash of their canonical serialization.
#[derive(Debug, Clone)]
pub struct DataObject {
    pub source_path: String,
    pub format: DataFormat,
    pub records: Vec<ObservationRecord>,
    /// Hex SHA-256 of `canonical_bytes`; doubles as the notification id
    pub content_hash: String,
    pub integrity: Integrity,
    /// Canonical GeoJSON FeatureCollection, published as the data object
    pub canonical_bytes: Bytes,
    /// Input rows or subsets dropped during conversion
    pub skipped: usize,
}

impl DataObject {
    /// Distinct station identifiers, sorted.
    pub fn station_ids(&self) -> BTreeSet<&str> {
        self.records.iter().map(|r| r.station_id.as_str()).collect()
    }

    pub fn temporal_extent(&self) -> Option<TemporalExtent> {
        TemporalExtent::enclosing(self.records.iter().map(|r| r.phenomenon_time))
    }

    /// Record positions, where known.
    pub fn record_points(&self) -> impl Iterator<Item = &Point> {
        self.records.iter().filter_map(|r| r.geometry.as_ref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A data object annotated with its dataset and station metadata.
///
/// Binding only touches this envelope; the records are left as converted.
#[derive(Debug, Clone)]
pub struct BoundObject {
    pub object: DataObject,
    pub dataset: TopicHierarchy,
    pub stations: BTreeMap<String, StationMetadata>,
}

impl BoundObject {
    /// Key under which delivery order is preserved.
    ///
    /// Every object of a dataset shares one key, so notifications touching
    /// the same station go out in enqueue order however the stations are
    /// grouped into objects.
    pub fn ordering_key(&self) -> String {
        self.dataset.dotpath().to_string()
    }

    /// The WIGOS identifier when the object concerns exactly one station.
    pub fn single_station(&self) -> Option<&StationMetadata> {
        if self.stations.len() == 1 {
            self.stations.values().next()
        } else {
            None
        }
    }
}
