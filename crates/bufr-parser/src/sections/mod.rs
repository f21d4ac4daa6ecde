//! BUFR section parsing.
//!
//! A BUFR message is made of six sections: indicator (0), identification
//! (1), optional local data (2), data description (3), data (4) and the
//! `7777` end marker (5). Sections 1 to 4 start with a 3-byte length.

use chrono::{DateTime, NaiveDate, Utc};

use crate::descriptor::Descriptor;
use crate::BufrError;

pub const MAGIC: &[u8] = b"BUFR";
pub const END_MARKER: &[u8] = b"7777";
pub const INDICATOR_LENGTH: usize = 8;

/// Section 0: Indicator Section (8 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator {
    pub message_length: usize,
    pub edition: u8,
}

/// Section 1: Identification Section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub master_table: u8,
    pub centre: u16,
    pub sub_centre: u16,
    pub update_sequence: u8,
    pub has_optional_section: bool,
    pub data_category: u8,
    pub international_subcategory: Option<u8>,
    pub local_subcategory: u8,
    pub master_table_version: u8,
    pub local_table_version: u8,
    /// Typical time of the message content
    pub typical_time: DateTime<Utc>,
}

/// Section 3: Data Description Section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDescription {
    pub number_of_subsets: u16,
    pub observed: bool,
    pub compressed: bool,
    pub descriptors: Vec<Descriptor>,
}

fn read_u24(data: &[u8], offset: usize) -> usize {
    ((data[offset] as usize) << 16) | ((data[offset + 1] as usize) << 8) | data[offset + 2] as usize
}

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator, BufrError> {
    if data.len() < INDICATOR_LENGTH {
        return Err(BufrError::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != MAGIC {
        return Err(BufrError::InvalidFormat(
            "Invalid BUFR magic bytes".to_string(),
        ));
    }

    // Octets 5-7: total length, octet 8: edition
    let message_length = read_u24(data, 4);
    let edition = data[7];

    if edition != 3 && edition != 4 {
        return Err(BufrError::InvalidFormat(format!(
            "Expected BUFR edition 3 or 4, got {}",
            edition
        )));
    }

    if message_length < INDICATOR_LENGTH + END_MARKER.len() {
        return Err(BufrError::InvalidFormat(format!(
            "Declared message length {} is too short",
            message_length
        )));
    }

    Ok(Indicator {
        message_length,
        edition,
    })
}

/// Length of the section starting at `offset`, checked against the buffer.
pub fn section_length(data: &[u8], offset: usize, section: u8) -> Result<usize, BufrError> {
    if offset + 3 > data.len() {
        return Err(BufrError::InvalidSection {
            section,
            reason: "Not enough data for section length".to_string(),
        });
    }

    let length = read_u24(data, offset);
    if length < 4 || offset + length > data.len() {
        return Err(BufrError::InvalidSection {
            section,
            reason: format!(
                "Section length {} at offset {} exceeds message of {} bytes",
                length,
                offset,
                data.len()
            ),
        });
    }

    Ok(length)
}

/// Parse Section 1 (Identification). Returns the section and its length.
pub fn parse_identification(
    data: &[u8],
    offset: usize,
    edition: u8,
) -> Result<(Identification, usize), BufrError> {
    let length = section_length(data, offset, 1)?;
    let sec = &data[offset..offset + length];

    let minimum = if edition >= 4 { 22 } else { 17 };
    if sec.len() < minimum {
        return Err(BufrError::InvalidSection {
            section: 1,
            reason: format!("Edition {} needs {} bytes, got {}", edition, minimum, sec.len()),
        });
    }

    let (ident, year, month, day, hour, minute, second) = if edition >= 4 {
        let ident = Identification {
            master_table: sec[3],
            centre: u16::from_be_bytes([sec[4], sec[5]]),
            sub_centre: u16::from_be_bytes([sec[6], sec[7]]),
            update_sequence: sec[8],
            has_optional_section: sec[9] & 0x80 != 0,
            data_category: sec[10],
            international_subcategory: Some(sec[11]),
            local_subcategory: sec[12],
            master_table_version: sec[13],
            local_table_version: sec[14],
            typical_time: DateTime::<Utc>::MIN_UTC,
        };
        let year = u16::from_be_bytes([sec[15], sec[16]]) as i32;
        (ident, year, sec[17], sec[18], sec[19], sec[20], sec[21])
    } else {
        let ident = Identification {
            master_table: sec[3],
            centre: sec[5] as u16,
            sub_centre: sec[4] as u16,
            update_sequence: sec[6],
            has_optional_section: sec[7] & 0x80 != 0,
            data_category: sec[8],
            international_subcategory: None,
            local_subcategory: sec[9],
            master_table_version: sec[10],
            local_table_version: sec[11],
            typical_time: DateTime::<Utc>::MIN_UTC,
        };
        // Edition 3 carries the year of the century
        let year_of_century = sec[12] as i32;
        let year = if year_of_century > 50 {
            1900 + year_of_century
        } else {
            2000 + year_of_century
        };
        (ident, year, sec[13], sec[14], sec[15], sec[16], 0)
    };

    let typical_time = NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| BufrError::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    Ok((
        Identification {
            typical_time: DateTime::<Utc>::from_naive_utc_and_offset(typical_time, Utc),
            ..ident
        },
        length,
    ))
}

/// Parse Section 3 (Data Description). Returns the section and its length.
pub fn parse_data_description(
    data: &[u8],
    offset: usize,
) -> Result<(DataDescription, usize), BufrError> {
    let length = section_length(data, offset, 3)?;
    let sec = &data[offset..offset + length];

    if sec.len() < 9 {
        return Err(BufrError::InvalidSection {
            section: 3,
            reason: "Not enough data".to_string(),
        });
    }

    // Octets 5-6: number of subsets, octet 7: observed/compressed flags,
    // octets 8+: descriptors, two octets each (a trailing pad octet is allowed)
    let number_of_subsets = u16::from_be_bytes([sec[4], sec[5]]);
    let flags = sec[6];
    let descriptors = sec[7..]
        .chunks_exact(2)
        .map(|pair| Descriptor::from_u16(u16::from_be_bytes([pair[0], pair[1]])))
        .collect::<Vec<_>>();

    if descriptors.is_empty() {
        return Err(BufrError::InvalidSection {
            section: 3,
            reason: "No descriptors".to_string(),
        });
    }

    Ok((
        DataDescription {
            number_of_subsets,
            observed: flags & 0x80 != 0,
            compressed: flags & 0x40 != 0,
            descriptors,
        },
        length,
    ))
}

/// Parse Section 4 (Data) and return its bit stream.
pub fn parse_data_section(data: &[u8], offset: usize) -> Result<&[u8], BufrError> {
    let length = section_length(data, offset, 4)?;
    Ok(&data[offset + 4..offset + length])
}
