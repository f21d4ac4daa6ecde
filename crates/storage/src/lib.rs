//! Storage for the WIS2 pipeline.
//!
//! Provides:
//! - A SQLite database holding the notification outbox and dead letters
//! - Object storage (local filesystem, memory or S3) for converted data objects

pub mod database;
pub mod dead_letter;
pub mod error;
pub mod features;
pub mod outbox;

pub use database::Database;
pub use dead_letter::{DeadLetter, DeadLetterSink, DeadLetterStage, DeadLetterStore};
pub use error::{StorageError, StorageResult};
pub use features::{FeatureStore, FeatureStoreConfig, ObjectFeatureStore, S3Config};
pub use outbox::{Enqueued, Outbox, OutboxCounts, OutboxEntry, OutboxState};
