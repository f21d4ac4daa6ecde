//! WIS2 Notification Messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::time::TemporalExtent;

/// Integrity block of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrity {
    pub method: String,
    pub value: String,
}

/// A composed notification ready for the outbox.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Content hash of the data object, stable across retries
    pub id: String,
    pub topic: String,
    pub dataset_id: String,
    pub canonical_url: String,
    pub geometry: Option<Geometry>,
    pub temporal_extent: TemporalExtent,
    pub integrity: Integrity,
    pub published_at: DateTime<Utc>,
    /// Delivery order is preserved among notifications sharing this key
    pub ordering_key: String,
    pub message: WisNotificationMessage,
}

impl Notification {
    /// Serialized message body sent to the broker.
    pub fn payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.message)
    }
}

/// Wire form of a WIS2 notification (GeoJSON Feature).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WisNotificationMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub geometry: Option<Geometry>,
    pub properties: MessageProperties,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub data_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<String>,
    pub pubtime: String,
    pub integrity: Integrity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wigos_station_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<InlineContent>,
}

/// Small data objects travel inside the message itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineContent {
    pub encoding: String,
    pub value: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}
