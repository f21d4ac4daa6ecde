//! Error types shared by the WIS2 node crates.

use thiserror::Error;

/// Result type alias using Wis2Error.
pub type Wis2Result<T> = Result<T, Wis2Error>;

/// Errors raised while validating shared domain values.
#[derive(Debug, Error)]
pub enum Wis2Error {
    #[error("Invalid topic hierarchy: {0}")]
    InvalidTopic(String),

    #[error("Invalid time format: {0}")]
    InvalidTime(String),

    #[error("Unknown data format: {0}")]
    UnknownFormat(String),
}
