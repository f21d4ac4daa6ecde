//! Common fixtures: a Malawian synoptic dataset and its stations.

/// Dataset id (topic hierarchy, dotted form).
pub const DATASET_ID: &str = "mw-mw_met_centre.data.core.weather.surface-based-observations.synop";

/// Topic the dataset publishes under.
pub const DATASET_TOPIC: &str =
    "origin/a/wis2/mw-mw_met_centre/data/core/weather/surface-based-observations/synop";

pub const STATION_ID: &str = "0-454-2-AWSCHIDOOLE";
pub const SECOND_STATION_ID: &str = "0-454-2-AWSLOBI";

/// Station registry CSV.
pub fn stations_csv() -> String {
    format!(
        "wigos_station_identifier,station_name,dataset_id,longitude,latitude,elevation\n\
         {},CHIDOOLE,{},33.78,-13.97,1160\n\
         {},LOBI,{},34.07,-14.39,1288\n",
        STATION_ID, DATASET_ID, SECOND_STATION_ID, DATASET_ID
    )
}

/// Minimal CSV: one station, one time, one parameter.
pub const SINGLE_ROW_CSV: &str =
    "station,time,air_temperature\n0-454-2-AWSCHIDOOLE,2022-01-12T13:55:00Z,24.85\n";

/// Several rows over two stations.
pub const MULTI_ROW_CSV: &str = "\
station,time,air_temperature,relative_humidity
0-454-2-AWSCHIDOOLE,2022-01-12T13:55:00Z,24.85,71
0-454-2-AWSCHIDOOLE,2022-01-12T14:00:00Z,25.10,
0-454-2-AWSLOBI,2022-01-12T13:55:00Z,21.30,80
";

/// The rows of [`MULTI_ROW_CSV`] in a different order.
pub const MULTI_ROW_CSV_REORDERED: &str = "\
station,time,air_temperature,relative_humidity
0-454-2-AWSLOBI,2022-01-12T13:55:00Z,21.30,80
0-454-2-AWSCHIDOOLE,2022-01-12T14:00:00Z,25.10,
0-454-2-AWSCHIDOOLE,2022-01-12T13:55:00Z,24.85,71
";

/// Mapping for the CSV fixtures above.
pub const MAPPINGS_YAML: &str = r#"
default:
  station: station
  time: time
  columns:
    - column: air_temperature
      parameter: air_temperature
      units: Celsius
    - column: relative_humidity
      parameter: relative_humidity
      units: "%"
  missing: ["", "NA", "-9999"]
"#;

/// A notification with an empty message body, for outbox and delivery tests.
pub fn notification(id: &str, dataset_id: &str, ordering_key: &str) -> wis2_common::Notification {
    use chrono::Utc;
    use wis2_common::notification::MessageProperties;
    use wis2_common::{Integrity, TemporalExtent, TopicHierarchy, WisNotificationMessage};

    let now = Utc::now();
    let topic = TopicHierarchy::parse(dataset_id)
        .map(|h| h.topic(wis2_common::topic::DEFAULT_TOPIC_PREFIX))
        .unwrap_or_else(|_| format!("origin/a/wis2/{}", dataset_id));
    let integrity = Integrity {
        method: "sha512".to_string(),
        value: format!("integrity-of-{}", id),
    };

    wis2_common::Notification {
        id: id.to_string(),
        topic: topic.clone(),
        dataset_id: dataset_id.to_string(),
        canonical_url: format!("http://localhost/data/{}.geojson", id),
        geometry: None,
        temporal_extent: TemporalExtent::new(now, now),
        integrity: integrity.clone(),
        published_at: now,
        ordering_key: ordering_key.to_string(),
        message: WisNotificationMessage {
            id: id.to_string(),
            kind: "Feature".to_string(),
            version: "v04".to_string(),
            geometry: None,
            properties: MessageProperties {
                data_id: format!("{}/{}", dataset_id, id),
                datetime: None,
                start_datetime: None,
                end_datetime: None,
                pubtime: wis2_common::format_timestamp(&now),
                integrity,
                wigos_station_identifier: None,
                content: None,
            },
            links: Vec::new(),
        },
    }
}
