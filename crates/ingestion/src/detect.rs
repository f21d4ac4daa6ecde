//! Format detection for intake files.

use std::io::Read;

use bytes::Bytes;
use wis2_common::{DataFormat, RawIntakeEvent};

use crate::error::ConversionError;

/// Detected file type based on extension and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Bufr,
    /// Gzip-compressed; the inner type is decided after decompression
    Gzip,
    Unknown,
}

/// Detect file type from path.
pub fn detect_file_type(path: &str) -> FileType {
    let lower = path.to_lowercase();

    if lower.ends_with(".gz") {
        FileType::Gzip
    } else if lower.ends_with(".csv") {
        FileType::Csv
    } else if lower.ends_with(".bufr") || lower.ends_with(".bufr4") || lower.ends_with(".bin") {
        FileType::Bufr
    } else {
        FileType::Unknown
    }
}

/// True when the payload contains a BUFR indicator section.
pub fn looks_like_bufr(content: &[u8]) -> bool {
    content.windows(4).take(1024).any(|w| w == b"BUFR")
}

/// Decompress gzip-compressed intake data.
pub fn decompress_gzip(data: &[u8]) -> Result<Bytes, ConversionError> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ConversionError::Decompression(e.to_string()))?;
    Ok(Bytes::from(decompressed))
}

/// Decide the format of an intake file, decompressing `.gz` first.
pub fn detect_format(path: &str, content: Bytes) -> Result<(DataFormat, Bytes), ConversionError> {
    match detect_file_type(path) {
        FileType::Csv => Ok((DataFormat::Csv, content)),
        FileType::Bufr => Ok((DataFormat::Bufr, content)),
        FileType::Gzip => {
            let inner = decompress_gzip(&content)?;
            let inner_path = &path[..path.len() - 3];
            detect_format(inner_path, inner)
        }
        FileType::Unknown if looks_like_bufr(&content) => Ok((DataFormat::Bufr, content)),
        FileType::Unknown => Err(ConversionError::UnsupportedFormat(path.to_string())),
    }
}

/// Build an intake event from a file's path and raw bytes.
pub fn prepare_event(path: &str, content: Bytes) -> Result<RawIntakeEvent, ConversionError> {
    let (format, content) = detect_format(path, content)?;
    Ok(RawIntakeEvent::new(path, content, format))
}
