//! Descriptor expansion and value decoding for uncompressed data sections.

use tracing::trace;

use crate::descriptor::Descriptor;
use crate::tables::{BufrTables, ElementEntry};
use crate::unpacking::{is_all_ones, BitReader};
use crate::{BufrError, BufrMessage};

/// Nesting limit for sequences and replications.
const MAX_DEPTH: usize = 32;

/// A decoded element value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Numeric(f64),
    Text(String),
    Missing,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

/// One element occurrence within a subset.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedElement {
    pub descriptor: Descriptor,
    pub name: String,
    pub units: String,
    pub value: Value,
    /// Repetition counter of the innermost enclosing replication
    pub replication: Option<u32>,
}

/// The elements of one subset in data-section order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subset {
    pub values: Vec<DecodedElement>,
}

impl Subset {
    /// First occurrence of `descriptor`.
    pub fn first(&self, descriptor: Descriptor) -> Option<&DecodedElement> {
        self.values.iter().find(|e| e.descriptor == descriptor)
    }

    /// First non-missing numeric value of `descriptor`.
    pub fn numeric(&self, descriptor: Descriptor) -> Option<f64> {
        self.values
            .iter()
            .filter(|e| e.descriptor == descriptor)
            .find_map(|e| e.value.as_f64())
    }

    /// First non-missing text value of `descriptor`.
    pub fn text(&self, descriptor: Descriptor) -> Option<&str> {
        self.values
            .iter()
            .filter(|e| e.descriptor == descriptor)
            .find_map(|e| e.value.as_str())
    }
}

/// Decode all subsets of an uncompressed message.
pub fn decode_subsets(message: &BufrMessage, tables: &BufrTables) -> Result<Vec<Subset>, BufrError> {
    if message.description.compressed {
        return Err(BufrError::CompressedData);
    }

    let mut reader = BitReader::new(&message.data);
    let mut subsets = Vec::with_capacity(message.description.number_of_subsets as usize);

    for index in 0..message.description.number_of_subsets {
        let mut subset = Subset::default();
        expand(
            &message.description.descriptors,
            tables,
            &mut reader,
            &mut subset.values,
            None,
            0,
        )?;
        trace!(subset = index, elements = subset.values.len(), "Decoded subset");
        subsets.push(subset);
    }

    Ok(subsets)
}

fn expand(
    descriptors: &[Descriptor],
    tables: &BufrTables,
    reader: &mut BitReader<'_>,
    out: &mut Vec<DecodedElement>,
    replication: Option<u32>,
    depth: usize,
) -> Result<(), BufrError> {
    if depth > MAX_DEPTH {
        return Err(BufrError::InvalidFormat(format!(
            "Descriptor nesting exceeds {} levels",
            MAX_DEPTH
        )));
    }

    let mut i = 0;
    while i < descriptors.len() {
        let descriptor = descriptors[i];
        match descriptor.f {
            0 => {
                let entry = tables
                    .element(descriptor)
                    .ok_or(BufrError::UnknownDescriptor(descriptor))?;
                let value = read_value(reader, descriptor, entry)?;
                out.push(DecodedElement {
                    descriptor,
                    name: entry.name.clone(),
                    units: entry.units.clone(),
                    value,
                    replication,
                });
                i += 1;
            }
            1 => {
                let span = descriptor.x as usize;
                let mut next = i + 1;

                let count = if descriptor.y == 0 {
                    // Delayed replication: the factor follows the operator
                    let factor = *descriptors.get(next).ok_or_else(|| {
                        BufrError::InvalidFormat(format!(
                            "Delayed replication {} lacks a factor descriptor",
                            descriptor
                        ))
                    })?;
                    if !factor.is_replication_factor() {
                        return Err(BufrError::InvalidFormat(format!(
                            "Expected replication factor after {}, got {}",
                            descriptor, factor
                        )));
                    }
                    let entry = tables
                        .element(factor)
                        .ok_or(BufrError::UnknownDescriptor(factor))?;
                    let raw = reader.read(entry.width)?;
                    out.push(DecodedElement {
                        descriptor: factor,
                        name: entry.name.clone(),
                        units: entry.units.clone(),
                        value: Value::Numeric(raw as f64),
                        replication,
                    });
                    next += 1;
                    raw as u32
                } else {
                    descriptor.y as u32
                };

                let group = descriptors.get(next..next + span).ok_or_else(|| {
                    BufrError::InvalidFormat(format!(
                        "Replication {} spans past the descriptor list",
                        descriptor
                    ))
                })?;

                for repetition in 0..count {
                    expand(group, tables, reader, out, Some(repetition), depth + 1)?;
                }
                i = next + span;
            }
            2 => return Err(BufrError::UnsupportedOperator(descriptor)),
            _ => {
                let members = tables
                    .sequence(descriptor)
                    .ok_or(BufrError::UnknownDescriptor(descriptor))?;
                expand(members, tables, reader, out, replication, depth + 1)?;
                i += 1;
            }
        }
    }

    Ok(())
}

fn read_value(
    reader: &mut BitReader<'_>,
    descriptor: Descriptor,
    entry: &ElementEntry,
) -> Result<Value, BufrError> {
    if entry.is_text() {
        let bytes = reader.read_bytes(entry.width / 8)?;
        if bytes.iter().all(|b| *b == 0xff) {
            return Ok(Value::Missing);
        }
        let text = String::from_utf8_lossy(&bytes)
            .trim_end_matches(|c: char| c == ' ' || c == '\0')
            .trim_start()
            .to_string();
        return Ok(Value::Text(text));
    }

    let raw = reader.read(entry.width)?;
    if !descriptor.is_replication_factor() && is_all_ones(raw, entry.width) {
        return Ok(Value::Missing);
    }

    let unscaled = i64::try_from(raw)
        .ok()
        .and_then(|raw| raw.checked_add(entry.reference))
        .ok_or_else(|| {
            BufrError::InvalidFormat(format!(
                "value {} of {} overflows with reference {}",
                raw, descriptor, entry.reference
            ))
        })? as f64;
    let scaled = if entry.scale >= 0 {
        unscaled / 10f64.powi(entry.scale)
    } else {
        unscaled * 10f64.powi(-entry.scale)
    };
    Ok(Value::Numeric(scaled))
}
