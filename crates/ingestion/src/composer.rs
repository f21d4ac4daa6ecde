//! WIS2 notification composition.
//!
//! One notification per bound data object. Everything except `pubtime` is
//! derived from the object itself, so composing the same object twice gives
//! the same id, topic, URL and integrity.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use wis2_common::notification::{InlineContent, Link, MessageProperties};
use wis2_common::topic::DEFAULT_TOPIC_PREFIX;
use wis2_common::{
    format_timestamp, BoundObject, Geometry, Notification, TemporalExtent, WisNotificationMessage,
};

/// Message format version.
pub const WNM_VERSION: &str = "v04";

/// Media type of the canonical data object.
pub const GEOJSON_MEDIA_TYPE: &str = "application/geo+json";

const OSCAR_STATION_URL: &str = "https://oscar.wmo.int/surface/#/search/station/stationReportDetails";

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_public_url() -> String {
    "http://localhost:8999".to_string()
}

fn default_inline_limit() -> usize {
    4096
}

/// Settings for composing notifications.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComposerSettings {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Base URL under which the features store is served
    #[serde(default = "default_public_url")]
    pub public_base_url: String,
    /// Objects smaller than this many bytes are embedded in the message
    #[serde(default = "default_inline_limit")]
    pub inline_limit: usize,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            public_base_url: default_public_url(),
            inline_limit: default_inline_limit(),
        }
    }
}

/// Builds notifications from bound data objects.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    settings: ComposerSettings,
}

impl Composer {
    pub fn new(settings: ComposerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ComposerSettings {
        &self.settings
    }

    /// Features store key of the canonical object:
    /// `<dataset dirpath>/<YYYY-MM-DD>/<hash>.geojson`.
    pub fn object_key(&self, bound: &BoundObject) -> String {
        let day = bound
            .object
            .temporal_extent()
            .map(|extent| extent.start.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "undated".to_string());
        format!(
            "{}/{}/{}.geojson",
            bound.dataset.dirpath(),
            day,
            bound.object.content_hash
        )
    }

    pub fn canonical_url(&self, bound: &BoundObject) -> String {
        format!(
            "{}/data/{}",
            self.settings.public_base_url.trim_end_matches('/'),
            self.object_key(bound)
        )
    }

    /// Envelope of the record positions, or of the station locations when
    /// the records carry none.
    pub fn geometry(bound: &BoundObject) -> Option<Geometry> {
        Geometry::bounding(bound.object.record_points()).or_else(|| {
            Geometry::bounding(bound.stations.values().filter_map(|s| s.location.as_ref()))
        })
    }

    pub fn compose(&self, bound: &BoundObject, published_at: DateTime<Utc>) -> Notification {
        let object = &bound.object;
        let id = object.content_hash.clone();
        let topic = bound.dataset.topic(&self.settings.topic_prefix);
        let canonical_url = self.canonical_url(bound);
        let geometry = Self::geometry(bound);
        let temporal_extent = object
            .temporal_extent()
            .unwrap_or_else(|| TemporalExtent::new(published_at, published_at));
        let length = object.canonical_bytes.len() as u64;

        let (datetime, start_datetime, end_datetime) = if temporal_extent.is_instant() {
            (Some(format_timestamp(&temporal_extent.start)), None, None)
        } else {
            (
                None,
                Some(format_timestamp(&temporal_extent.start)),
                Some(format_timestamp(&temporal_extent.end)),
            )
        };

        let content = (object.canonical_bytes.len() < self.settings.inline_limit).then(|| InlineContent {
            encoding: "base64".to_string(),
            value: STANDARD.encode(&object.canonical_bytes),
            size: length,
        });

        let mut links = vec![Link {
            rel: "canonical".to_string(),
            media_type: GEOJSON_MEDIA_TYPE.to_string(),
            href: canonical_url.clone(),
            length: Some(length),
        }];

        let station = bound.single_station();
        if let Some(station) = station {
            links.push(Link {
                rel: "via".to_string(),
                media_type: "text/html".to_string(),
                href: format!("{}/{}", OSCAR_STATION_URL, station.wigos_station_identifier),
                length: None,
            });
        }

        let message = WisNotificationMessage {
            id: id.clone(),
            kind: "Feature".to_string(),
            version: WNM_VERSION.to_string(),
            geometry: geometry.clone(),
            properties: MessageProperties {
                data_id: format!("{}/{}", bound.dataset.dirpath(), id),
                datetime,
                start_datetime,
                end_datetime,
                pubtime: format_timestamp(&published_at),
                integrity: object.integrity.clone(),
                wigos_station_identifier: station.map(|s| s.wigos_station_identifier.clone()),
                content,
            },
            links,
        };

        Notification {
            id,
            topic,
            dataset_id: bound.dataset.dotpath().to_string(),
            canonical_url,
            geometry,
            temporal_extent,
            integrity: object.integrity.clone(),
            published_at,
            ordering_key: bound.ordering_key(),
            message,
        }
    }
}
