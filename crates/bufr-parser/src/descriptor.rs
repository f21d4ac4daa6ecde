//! BUFR descriptors (F-XX-YYY).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

/// A 16-bit descriptor: F (2 bits), X (6 bits), Y (8 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor {
    pub f: u8,
    pub x: u8,
    pub y: u8,
}

impl Descriptor {
    pub const fn new(f: u8, x: u8, y: u8) -> Self {
        Self { f, x, y }
    }

    pub fn from_u16(raw: u16) -> Self {
        Self {
            f: (raw >> 14) as u8,
            x: ((raw >> 8) & 0x3f) as u8,
            y: (raw & 0xff) as u8,
        }
    }

    pub fn to_u16(self) -> u16 {
        ((self.f as u16) << 14) | ((self.x as u16) << 8) | self.y as u16
    }

    pub fn is_element(&self) -> bool {
        self.f == 0
    }

    /// Class 31 holds replication factors and associated-field significances.
    pub fn is_replication_factor(&self) -> bool {
        self.f == 0 && self.x == 31
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02}{:03}", self.f, self.x, self.y)
    }
}

impl FromStr for Descriptor {
    type Err = String;

    /// Accepts `012101` or `0-12-101`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid descriptor '{}'", s));
        }
        let f: u8 = digits[0..1].parse().map_err(|_| format!("invalid F in '{}'", s))?;
        let x: u8 = digits[1..3].parse().map_err(|_| format!("invalid X in '{}'", s))?;
        let y: u8 = digits[3..6].parse().map_err(|_| format!("invalid Y in '{}'", s))?;
        if f > 3 || x > 63 {
            return Err(format!("descriptor '{}' out of range", s));
        }
        Ok(Self::new(f, x, y))
    }
}

impl<'de> Deserialize<'de> for Descriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_roundtrip() {
        let d = Descriptor::new(3, 1, 150);
        assert_eq!(Descriptor::from_u16(d.to_u16()), d);
        assert_eq!(Descriptor::from_u16(0x0c65), Descriptor::new(0, 12, 101));
    }

    #[test]
    fn test_display_and_parse() {
        let d: Descriptor = "0-12-101".parse().unwrap();
        assert_eq!(d.to_string(), "012101");
        assert_eq!("012101".parse::<Descriptor>().unwrap(), d);
        assert!("12101".parse::<Descriptor>().is_err());
        assert!("412101".parse::<Descriptor>().is_err());
    }
}
