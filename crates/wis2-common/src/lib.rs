//! Common types shared across the WIS2 node crates and services.

pub mod bbox;
pub mod error;
pub mod geometry;
pub mod notification;
pub mod object;
pub mod observation;
pub mod station;
pub mod time;
pub mod topic;

pub use bbox::BoundingBox;
pub use error::{Wis2Error, Wis2Result};
pub use geometry::{Geometry, Point};
pub use notification::{Integrity, Notification, WisNotificationMessage};
pub use object::{BoundObject, DataObject};
pub use observation::{DataFormat, ObservationRecord, RawIntakeEvent};
pub use station::StationMetadata;
pub use time::{format_timestamp, parse_timestamp, TemporalExtent};
pub use topic::TopicHierarchy;
