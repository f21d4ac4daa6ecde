//! Observation ingestion library.
//!
//! Turns raw intake files into WIS2 notifications:
//!
//! - format detection and gzip handling ([`detect`])
//! - CSV and BUFR conversion into observation records ([`convert`])
//! - canonical ordering, content hashing and integrity ([`stamper`])
//! - dataset and station binding against a registry ([`binder`], [`registry`])
//! - WIS2 Notification Message composition ([`composer`])
//!
//! Every stage here is synchronous and free of I/O except the registry
//! file reload; the `ingester` service schedules them.

pub mod binder;
pub mod composer;
pub mod convert;
pub mod detect;
pub mod error;
pub mod mappings;
pub mod registry;
pub mod stamper;

// Re-exports
pub use binder::Binder;
pub use composer::{Composer, ComposerSettings};
pub use convert::{BufrConverter, Converted, Converter, ConverterSet, CsvConverter};
pub use detect::{detect_file_type, detect_format, prepare_event, FileType};
pub use error::{BindError, ConversionError, IngestionError, Result};
pub use mappings::{ColumnMapping, CsvMapping, DataMappings};
pub use registry::{CsvStationRegistry, InMemoryRegistry, StationRegistry};
pub use stamper::stamp;
