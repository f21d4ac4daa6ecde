//! Error types for the ingestion crate.

use thiserror::Error;

/// Conversion failures. All of them are local to one intake event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// Broken framing, unknown mandatory descriptors, bad checksums or an
    /// unreadable table layout
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// Every row or subset was invalid or empty
    #[error("No valid observations (skipped {skipped})")]
    EmptyResult { skipped: usize },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),
}

impl From<bufr_parser::BufrError> for ConversionError {
    fn from(e: bufr_parser::BufrError) -> Self {
        ConversionError::Malformed(e.to_string())
    }
}

/// Metadata binding failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    /// The registry has no entry (yet) for this station
    #[error("Unknown station: {0}")]
    UnknownStation(String),

    /// Stations of one data object belong to different datasets
    #[error("Stations map to conflicting datasets: {0:?}")]
    DatasetConflict(Vec<String>),

    #[error("Invalid dataset id '{dataset}': {reason}")]
    InvalidDataset { dataset: String, reason: String },
}

impl BindError {
    /// Registry entries may appear after a sync; nothing else heals itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BindError::UnknownStation(_))
    }
}

/// Errors that can occur while setting up or running ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("Invalid station registry: {0}")]
    Registry(String),

    #[error("Invalid data mappings: {0}")]
    Mappings(String),

    #[error("Invalid BUFR tables: {0}")]
    Tables(String),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_retryability() {
        assert!(BindError::UnknownStation("x".into()).is_retryable());
        assert!(!BindError::DatasetConflict(vec!["a".into(), "b".into()]).is_retryable());
    }

    #[test]
    fn test_bufr_errors_are_malformed() {
        let e: ConversionError = bufr_parser::BufrError::MissingEndMarker.into();
        assert!(matches!(e, ConversionError::Malformed(_)));
    }
}
