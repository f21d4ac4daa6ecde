//! Station registry entries.

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Discovery metadata for one observing station, as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    pub wigos_station_identifier: String,
    #[serde(default)]
    pub name: String,
    /// Dotted topic hierarchy of the dataset the station publishes into
    pub dataset_id: String,
    #[serde(default)]
    pub location: Option<Point>,
}
