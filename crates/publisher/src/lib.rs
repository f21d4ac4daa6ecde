//! Notification delivery.
//!
//! Notifications are persisted to the outbox by [`Publisher::enqueue`] and
//! delivered by one loop per key partition. Within a partition only the
//! oldest outstanding entry of each ordering key is attempted, so delivery
//! is FIFO per key while unrelated keys proceed concurrently.

pub mod broker;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod mqtt;
pub mod retry;

pub use broker::Broker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{partition_for, DeliveryOutcome, DeliveryReport, Publisher, PublisherSettings};
pub use error::PublishError;
pub use mqtt::{MqttBroker, MqttConfig};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
