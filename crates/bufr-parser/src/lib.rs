//! BUFR parser implementation (WMO FM 94 BUFR editions 3 and 4).
//!
//! Splits a byte stream into messages, parses the fixed sections and
//! decodes the data section by expanding the descriptor list against
//! element (Table B) and sequence (Table D) tables.

pub mod decoder;
pub mod descriptor;
pub mod sections;
pub mod tables;
pub mod unpacking;

use bytes::Bytes;
use thiserror::Error;

pub use decoder::{DecodedElement, Subset, Value};
pub use descriptor::Descriptor;
pub use sections::{DataDescription, Identification, Indicator};
pub use tables::{BufrTables, ElementEntry};

/// Errors raised while framing or decoding BUFR data.
#[derive(Error, Debug)]
pub enum BufrError {
    #[error("Invalid BUFR format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Declared message length {declared} does not match available {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Missing end section marker '7777'")]
    MissingEndMarker,

    #[error("Unknown descriptor {0}")]
    UnknownDescriptor(Descriptor),

    #[error("Unsupported operator descriptor {0}")]
    UnsupportedOperator(Descriptor),

    #[error("Data section exhausted: needed {needed} bits at bit {position}")]
    Truncated { needed: usize, position: usize },

    #[error("Compressed data sections are not supported")]
    CompressedData,

    #[error("Invalid table definition: {0}")]
    InvalidTable(String),
}

/// A single framed BUFR message with its parsed header sections.
#[derive(Debug, Clone)]
pub struct BufrMessage {
    pub indicator: Indicator,
    pub identification: Identification,
    pub description: DataDescription,
    /// Raw bit stream of section 4 (after its 4-byte header)
    pub data: Bytes,
}

impl BufrMessage {
    /// Parse one complete message (`BUFR` ... `7777`).
    pub fn parse(message: &[u8]) -> Result<Self, BufrError> {
        let indicator = sections::parse_indicator(message)?;
        if indicator.message_length != message.len() {
            return Err(BufrError::LengthMismatch {
                declared: indicator.message_length,
                actual: message.len(),
            });
        }
        if !message.ends_with(sections::END_MARKER) {
            return Err(BufrError::MissingEndMarker);
        }

        let mut offset = sections::INDICATOR_LENGTH;
        let (identification, len) = sections::parse_identification(message, offset, indicator.edition)?;
        offset += len;

        if identification.has_optional_section {
            offset += sections::section_length(message, offset, 2)?;
        }

        let (description, len) = sections::parse_data_description(message, offset)?;
        offset += len;

        let data = sections::parse_data_section(message, offset)?;
        offset += sections::section_length(message, offset, 4)?;

        if offset + sections::END_MARKER.len() != message.len() {
            return Err(BufrError::InvalidSection {
                section: 5,
                reason: format!(
                    "sections end at byte {} but message is {} bytes",
                    offset + sections::END_MARKER.len(),
                    message.len()
                ),
            });
        }

        Ok(Self {
            indicator,
            identification,
            description,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Decode every subset of the data section.
    pub fn decode(&self, tables: &BufrTables) -> Result<Vec<Subset>, BufrError> {
        decoder::decode_subsets(self, tables)
    }
}

/// Iterates over the messages contained in a BUFR file.
///
/// Bytes between messages (bulletin headers, padding) are skipped.
pub struct BufrReader {
    data: Bytes,
    position: usize,
}

impl BufrReader {
    pub fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    /// Return the next message, `Ok(None)` once the input is exhausted.
    pub fn next_message(&mut self) -> Result<Option<BufrMessage>, BufrError> {
        let rest = &self.data[self.position..];
        let start = match rest.windows(4).position(|w| w == sections::MAGIC) {
            Some(start) => start,
            None => {
                self.position = self.data.len();
                return Ok(None);
            }
        };

        let candidate = &rest[start..];
        let indicator = sections::parse_indicator(candidate)?;
        if indicator.message_length > candidate.len() {
            return Err(BufrError::LengthMismatch {
                declared: indicator.message_length,
                actual: candidate.len(),
            });
        }

        let message = BufrMessage::parse(&candidate[..indicator.message_length])?;
        self.position += start + indicator.message_length;
        Ok(Some(message))
    }

    /// Collect all messages, failing on the first malformed one.
    pub fn read_all(mut self) -> Result<Vec<BufrMessage>, BufrError> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }
}
