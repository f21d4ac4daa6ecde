//! Synthetic BUFR edition 4 messages.
//!
//! The builder writes sections 0 to 5 around a caller-supplied descriptor
//! list and bit-packed data section, so tests can produce exactly the
//! messages they need without binary fixture files.

/// MSB-first bit packer.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `width` bits of `value`.
    pub fn push(&mut self, value: u64, width: usize) {
        for i in (0..width).rev() {
            let bit = ((value >> i) & 1) as u8;
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if bit == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (7 - (self.bit_len % 8));
            }
            self.bit_len += 1;
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Packed bytes, zero padded to a whole octet.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encode a descriptor string (`FXXYYY`) as its 16-bit form.
pub fn descriptor_code(descriptor: &str) -> u16 {
    let digits: String = descriptor.chars().filter(|c| c.is_ascii_digit()).collect();
    assert_eq!(digits.len(), 6, "descriptor must have 6 digits: {}", descriptor);
    let f: u16 = digits[0..1].parse().unwrap();
    let x: u16 = digits[1..3].parse().unwrap();
    let y: u16 = digits[3..6].parse().unwrap();
    (f << 14) | (x << 8) | y
}

/// Builder for a single BUFR edition 4 message.
#[derive(Debug, Clone)]
pub struct BufrBuilder {
    centre: u16,
    data_category: u8,
    typical_time: (u16, u8, u8, u8, u8, u8),
    subsets: u16,
    compressed: bool,
    descriptors: Vec<u16>,
    data: BitWriter,
}

impl Default for BufrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BufrBuilder {
    pub fn new() -> Self {
        Self {
            centre: 0,
            data_category: 0,
            typical_time: (2022, 1, 12, 13, 55, 0),
            subsets: 1,
            compressed: false,
            descriptors: Vec::new(),
            data: BitWriter::new(),
        }
    }

    pub fn centre(mut self, centre: u16) -> Self {
        self.centre = centre;
        self
    }

    pub fn typical_time(mut self, year: u16, month: u8, day: u8, hour: u8, minute: u8) -> Self {
        self.typical_time = (year, month, day, hour, minute, 0);
        self
    }

    pub fn subsets(mut self, subsets: u16) -> Self {
        self.subsets = subsets;
        self
    }

    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Descriptors of section 3, e.g. `["301150", "012101"]`.
    pub fn descriptors(mut self, descriptors: &[&str]) -> Self {
        self.descriptors = descriptors.iter().map(|d| descriptor_code(d)).collect();
        self
    }

    /// Append a raw packed value to the data section.
    pub fn bits(mut self, value: u64, width: usize) -> Self {
        self.data.push(value, width);
        self
    }

    /// Append an all-ones (missing) value.
    pub fn missing(mut self, width: usize) -> Self {
        let value = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        self.data.push(value, width);
        self
    }

    /// Append CCITT IA5 text, space padded to `octets`.
    pub fn text(mut self, text: &str, octets: usize) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(octets, b' ');
        for byte in bytes.into_iter().take(octets) {
            self.data.push(byte as u64, 8);
        }
        self
    }

    /// Append a value encoded with the given scale and reference.
    pub fn scaled(self, value: f64, scale: i32, reference: i64, width: usize) -> Self {
        let raw = (value * 10f64.powi(scale)).round() as i64 - reference;
        self.bits(raw as u64, width)
    }

    /// WIGOS identifier via sequence 301150.
    pub fn wigos_id(self, series: u64, issuer: u64, issue: u64, local: &str) -> Self {
        self.bits(series, 4)
            .bits(issuer, 16)
            .bits(issue, 16)
            .text(local, 16)
    }

    /// Date and time via sequences 301011 and 301012.
    pub fn date_time(self, year: u64, month: u64, day: u64, hour: u64, minute: u64) -> Self {
        self.bits(year, 12)
            .bits(month, 4)
            .bits(day, 6)
            .bits(hour, 5)
            .bits(minute, 6)
    }

    /// Latitude and longitude via sequence 301021.
    pub fn location(self, lat: f64, lon: f64) -> Self {
        self.scaled(lat, 5, -9_000_000, 25)
            .scaled(lon, 5, -18_000_000, 26)
    }

    pub fn build(self) -> Vec<u8> {
        let (year, month, day, hour, minute, second) = self.typical_time;

        let mut section1 = vec![0, 0, 22, 0];
        section1.extend_from_slice(&self.centre.to_be_bytes());
        section1.extend_from_slice(&0u16.to_be_bytes()); // sub-centre
        section1.push(0); // update sequence
        section1.push(0); // no optional section
        section1.push(self.data_category);
        section1.push(0); // international sub-category
        section1.push(0); // local sub-category
        section1.push(38); // master table version
        section1.push(0); // local table version
        section1.extend_from_slice(&year.to_be_bytes());
        section1.extend_from_slice(&[month, day, hour, minute, second]);

        let section3_len = 7 + 2 * self.descriptors.len();
        let mut section3 = vec![
            (section3_len >> 16) as u8,
            (section3_len >> 8) as u8,
            section3_len as u8,
            0,
        ];
        section3.extend_from_slice(&self.subsets.to_be_bytes());
        let flags = 0x80 | if self.compressed { 0x40 } else { 0 };
        section3.push(flags);
        for descriptor in &self.descriptors {
            section3.extend_from_slice(&descriptor.to_be_bytes());
        }

        let data = self.data.finish();
        let section4_len = 4 + data.len();
        let mut section4 = vec![
            (section4_len >> 16) as u8,
            (section4_len >> 8) as u8,
            section4_len as u8,
            0,
        ];
        section4.extend_from_slice(&data);

        let total = 8 + section1.len() + section3.len() + section4.len() + 4;
        let mut message = b"BUFR".to_vec();
        message.extend_from_slice(&[(total >> 16) as u8, (total >> 8) as u8, total as u8, 4]);
        message.extend(section1);
        message.extend(section3);
        message.extend(section4);
        message.extend_from_slice(b"7777");
        message
    }
}

/// A one-subset surface message: WIGOS id, date/time, position and air
/// temperature in kelvin.
pub fn synop_message(local_id: &str, lat: f64, lon: f64, temperature_k: f64) -> Vec<u8> {
    BufrBuilder::new()
        .descriptors(&["301150", "301011", "301012", "301021", "012101"])
        .wigos_id(0, 454, 2, local_id)
        .date_time(2022, 1, 12, 13, 55)
        .location(lat, lon)
        .scaled(temperature_k, 2, 0, 16)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_writer_packs_msb_first() {
        let mut writer = BitWriter::new();
        writer.push(0b10, 2);
        writer.push(0b110101, 6);
        writer.push(1, 1);
        assert_eq!(writer.bit_len(), 9);
        assert_eq!(writer.finish(), vec![0b1011_0101, 0b1000_0000]);
    }

    #[test]
    fn test_descriptor_code() {
        assert_eq!(descriptor_code("012101"), 0x0c65);
        assert_eq!(descriptor_code("3-01-150"), (3 << 14) | (1 << 8) | 150);
    }

    #[test]
    fn test_message_framing() {
        let message = synop_message("AWSCHIDOOLE", -13.97, 33.78, 298.0);
        assert_eq!(&message[0..4], b"BUFR");
        assert_eq!(&message[message.len() - 4..], b"7777");
        let declared =
            ((message[4] as usize) << 16) | ((message[5] as usize) << 8) | message[6] as usize;
        assert_eq!(declared, message.len());
        assert_eq!(message[7], 4);
    }
}
