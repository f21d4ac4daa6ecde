//! WIS2 node ingester service.
//!
//! Watches an intake directory, converts CSV and BUFR observations into
//! GeoJSON data objects, binds them to datasets and stations, and publishes
//! WIS2 Notification Messages to an MQTT broker through a durable outbox.

pub mod backpressure;
pub mod config;
pub mod intake;
pub mod pipeline;
pub mod server;
pub mod service;
pub mod tracker;

pub use config::IngesterConfig;
pub use service::IngesterService;
