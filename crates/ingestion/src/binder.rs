//! Metadata binding: attach dataset and station metadata to a data object.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;
use wis2_common::{BoundObject, DataObject, StationMetadata, TopicHierarchy};

use crate::error::BindError;
use crate::registry::StationRegistry;

/// Resolves the stations of a data object against the registry.
#[derive(Clone)]
pub struct Binder {
    registry: Arc<dyn StationRegistry>,
}

impl Binder {
    pub fn new(registry: Arc<dyn StationRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<dyn StationRegistry> {
        &self.registry
    }

    /// Resolve every station of the object, reporting the first unknown
    /// one, and check that they all publish into one dataset.
    pub fn resolve(
        &self,
        object: &DataObject,
    ) -> Result<(TopicHierarchy, BTreeMap<String, StationMetadata>), BindError> {
        let mut stations = BTreeMap::new();
        for station_id in object.station_ids() {
            let metadata = self
                .registry
                .resolve(station_id)
                .ok_or_else(|| BindError::UnknownStation(station_id.to_string()))?;
            stations.insert(station_id.to_string(), metadata);
        }

        let datasets: BTreeSet<&str> = stations.values().map(|s| s.dataset_id.as_str()).collect();
        let dataset_id = match datasets.len() {
            1 => datasets.iter().next().copied().unwrap_or_default(),
            _ => {
                return Err(BindError::DatasetConflict(
                    datasets.into_iter().map(str::to_string).collect(),
                ))
            }
        };

        let dataset = TopicHierarchy::parse(dataset_id).map_err(|e| BindError::InvalidDataset {
            dataset: dataset_id.to_string(),
            reason: e.to_string(),
        })?;
        Ok((dataset, stations))
    }

    /// Annotate the object; the records themselves are untouched.
    pub fn bind(&self, object: DataObject) -> Result<BoundObject, BindError> {
        let (dataset, stations) = self.resolve(&object)?;
        debug!(
            hash = %object.content_hash,
            dataset = %dataset,
            stations = stations.len(),
            "Bound data object"
        );
        Ok(BoundObject {
            object,
            dataset,
            stations,
        })
    }
}
