//! Station registry lookups.
//!
//! The registry is owned elsewhere; this crate only reads it. The CSV
//! implementation follows the station list file and picks up edits made by
//! a registry sync without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use serde::Deserialize;
use tracing::{info, warn};
use wis2_common::{Point, StationMetadata};

use crate::error::{IngestionError, Result};

/// Read-only lookup of station metadata by WIGOS identifier.
pub trait StationRegistry: Send + Sync {
    /// `None` when the station is not (yet) known.
    fn resolve(&self, station_id: &str) -> Option<StationMetadata>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed set of stations.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    stations: HashMap<String, StationMetadata>,
}

impl InMemoryRegistry {
    pub fn new(stations: impl IntoIterator<Item = StationMetadata>) -> Self {
        Self {
            stations: stations
                .into_iter()
                .map(|s| (s.wigos_station_identifier.clone(), s))
                .collect(),
        }
    }

    pub fn insert(&mut self, station: StationMetadata) {
        self.stations
            .insert(station.wigos_station_identifier.clone(), station);
    }
}

impl StationRegistry for InMemoryRegistry {
    fn resolve(&self, station_id: &str) -> Option<StationMetadata> {
        self.stations.get(station_id).cloned()
    }

    fn len(&self) -> usize {
        self.stations.len()
    }
}

#[derive(Debug, Deserialize)]
struct StationRow {
    wigos_station_identifier: String,
    #[serde(default)]
    station_name: String,
    dataset_id: String,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    elevation: Option<f64>,
}

impl From<StationRow> for StationMetadata {
    fn from(row: StationRow) -> Self {
        let location = match (row.longitude, row.latitude) {
            (Some(lon), Some(lat)) => Some(Point::new(lon, lat, row.elevation)),
            _ => None,
        };
        StationMetadata {
            wigos_station_identifier: row.wigos_station_identifier,
            name: row.station_name,
            dataset_id: row.dataset_id,
            location,
        }
    }
}

/// Parse a station list
/// (`wigos_station_identifier,station_name,dataset_id,longitude,latitude,elevation`).
pub fn parse_station_csv(data: &[u8]) -> Result<Vec<StationMetadata>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    reader
        .deserialize::<StationRow>()
        .enumerate()
        .map(|(line, row)| {
            row.map(StationMetadata::from)
                .map_err(|e| IngestionError::Registry(format!("line {}: {}", line + 2, e)))
        })
        .collect()
}

#[derive(Debug, Default)]
struct Snapshot {
    modified: Option<SystemTime>,
    stations: HashMap<String, StationMetadata>,
}

/// Station list backed by a CSV file, reloaded when its modification time
/// changes.
#[derive(Debug)]
pub struct CsvStationRegistry {
    path: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl CsvStationRegistry {
    /// Load the registry; the file must exist and parse.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = Self::load(&path)?;
        info!(path = %path.display(), stations = snapshot.stations.len(), "Loaded station registry");
        Ok(Self {
            path,
            snapshot: RwLock::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Snapshot> {
        let modified = std::fs::metadata(path)?.modified().ok();
        let data = std::fs::read(path)?;
        let stations = parse_station_csv(&data)?
            .into_iter()
            .map(|s| (s.wigos_station_identifier.clone(), s))
            .collect();
        Ok(Snapshot { modified, stations })
    }

    /// Reload if the file changed since the last load. A file that fails to
    /// parse leaves the previous stations in place.
    pub fn refresh(&self) {
        let current = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        {
            let snapshot = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
            if current.is_none() || snapshot.modified == current {
                return;
            }
        }

        match Self::load(&self.path) {
            Ok(fresh) => {
                info!(
                    path = %self.path.display(),
                    stations = fresh.stations.len(),
                    "Station registry changed, reloaded"
                );
                *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = fresh;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Keeping previous station registry");
            }
        }
    }
}

impl StationRegistry for CsvStationRegistry {
    fn resolve(&self, station_id: &str) -> Option<StationMetadata> {
        self.refresh();
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .stations
            .get(station_id)
            .cloned()
    }

    fn len(&self) -> usize {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .stations
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATIONS: &str = "\
wigos_station_identifier,station_name,dataset_id,longitude,latitude,elevation
0-454-2-AWSCHIDOOLE,CHIDOOLE,mw-mw_met_centre.data.core.weather.surface-based-observations.synop,33.78,-13.97,1160
0-454-2-AWSNOPOS,NOPOS,mw-mw_met_centre.data.core.weather.surface-based-observations.synop,,,
";

    #[test]
    fn test_parse_station_csv() {
        let stations = parse_station_csv(STATIONS.as_bytes()).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].name, "CHIDOOLE");
        assert_eq!(stations[0].location, Some(Point::new(33.78, -13.97, Some(1160.0))));
        assert!(stations[1].location.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_row() {
        let result = parse_station_csv(b"wigos_station_identifier,dataset_id,longitude\na,b,east\n");
        assert!(matches!(result, Err(IngestionError::Registry(_))));
    }

    #[test]
    fn test_in_memory() {
        let stations = parse_station_csv(STATIONS.as_bytes()).unwrap();
        let registry = InMemoryRegistry::new(stations);
        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("0-454-2-AWSCHIDOOLE").is_some());
        assert!(registry.resolve("0-454-2-UNKNOWN").is_none());
    }

    #[test]
    fn test_file_registry_reloads_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.csv");
        let header = "wigos_station_identifier,station_name,dataset_id,longitude,latitude,elevation\n";
        std::fs::write(&path, format!("{}a,A,c.d,1,2,3\n", header)).unwrap();

        let registry = CsvStationRegistry::open(&path).unwrap();
        assert!(registry.resolve("b").is_none());

        std::fs::write(&path, format!("{}a,A,c.d,1,2,3\nb,B,c.d,4,5,6\n", header)).unwrap();
        let file = std::fs::File::options().append(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();

        assert_eq!(registry.resolve("b").map(|s| s.name), Some("B".to_string()));
        assert_eq!(registry.len(), 2);
    }
}
