use std::time::Duration;

use thiserror::Error;

/// Outcome of a failed publish attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    /// Broker unreachable, connection dropped or negative acknowledgement
    #[error("Transient publish failure: {0}")]
    Transient(String),

    /// The broker will never accept this payload
    #[error("Publish rejected: {0}")]
    Rejected(String),

    #[error("Publish not confirmed within {0:?}")]
    Timeout(Duration),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::Rejected(_))
    }
}
