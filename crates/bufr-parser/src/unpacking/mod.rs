//! Bit-level reading of the BUFR data section.
//!
//! Values are packed MSB first with no alignment between elements.

use crate::BufrError;

/// Sequential reader over a packed bit stream.
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current offset in bits.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.position.min(self.data.len() * 8)
    }

    /// Read `width` bits (at most 64) as an unsigned integer.
    pub fn read(&mut self, width: usize) -> Result<u64, BufrError> {
        if width == 0 || width > 64 {
            return Err(BufrError::InvalidFormat(format!(
                "Invalid number of bits: {}",
                width
            )));
        }
        if width > self.remaining_bits() {
            return Err(BufrError::Truncated {
                needed: width,
                position: self.position,
            });
        }

        let mut result = 0u64;
        for i in 0..width {
            let absolute_bit = self.position + i;
            let byte_idx = absolute_bit / 8;
            let bit_idx = 7 - (absolute_bit % 8);
            let bit = (self.data[byte_idx] >> bit_idx) & 1;
            result = (result << 1) | bit as u64;
        }

        self.position += width;
        Ok(result)
    }

    /// Read `count` whole octets (not necessarily byte aligned).
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, BufrError> {
        (0..count).map(|_| self.read(8).map(|b| b as u8)).collect()
    }
}

/// True when `raw` has all `width` bits set, the BUFR missing-value pattern.
pub fn is_all_ones(raw: u64, width: usize) -> bool {
    if width >= 64 {
        raw == u64::MAX
    } else {
        raw == (1u64 << width) - 1
    }
}
