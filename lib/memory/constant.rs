use crate::memory::{AddressStridePolicy, Location, UnitBundle};
use crate::types::Endian;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The statically known content of a region of memory.
///
/// A `MemoryConstant` is what a `LogicalValue` becomes once every pointer in
/// it targets a fixed region. Addresses stay symbolic until the memory
/// layout is final, so constants holding an `Address` have indeterminate
/// units.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum MemoryConstant {
    Units(UnitBundle),
    Address {
        target: Location,
        bits: usize,
        policy: AddressStridePolicy,
    },
    Aggregate(Vec<MemoryConstant>),
    Slice {
        source: Box<MemoryConstant>,
        delta: usize,
        size: usize,
    },
}

impl MemoryConstant {
    /// The size of this constant in addressable units.
    pub fn size(&self) -> usize {
        match self {
            MemoryConstant::Units(units) => units.len(),
            MemoryConstant::Address { bits, policy, .. } => policy.units_for_bits(*bits),
            MemoryConstant::Aggregate(parts) => parts.iter().map(|part| part.size()).sum(),
            MemoryConstant::Slice { size, .. } => *size,
        }
    }

    /// Returns true if any part of this constant is an address.
    pub fn contains_address(&self) -> bool {
        match self {
            MemoryConstant::Units(_) => false,
            MemoryConstant::Address { .. } => true,
            MemoryConstant::Aggregate(parts) => parts.iter().any(|part| part.contains_address()),
            MemoryConstant::Slice { source, .. } => source.contains_address(),
        }
    }

    /// Flatten this constant into units. Addresses flatten to indeterminate
    /// units.
    pub fn units(&self) -> Result<UnitBundle, Error> {
        Ok(match self {
            MemoryConstant::Units(units) => units.clone(),
            MemoryConstant::Address { bits, policy, .. } => {
                UnitBundle::indeterminate(policy.units_for_bits(*bits), *policy)
            }
            MemoryConstant::Aggregate(parts) => {
                let mut parts = parts.iter();
                let mut units = match parts.next() {
                    Some(part) => part.units()?,
                    None => return Err("empty aggregate constant has no units".into()),
                };
                for part in parts {
                    units.append(&part.units()?)?;
                }
                units
            }
            MemoryConstant::Slice {
                source,
                delta,
                size,
            } => source.units()?.slice(*delta, *size),
        })
    }

    /// The numeric value of this constant, if it holds no address and fits in
    /// 64 bits.
    pub fn numeric(&self, endian: Endian) -> Option<u64> {
        if self.contains_address() {
            return None;
        }
        self.units().ok()?.to_value(endian)
    }

    /// The bit width of this constant.
    pub fn bit_size(&self) -> usize {
        self.units().map(|units| units.bit_size()).unwrap_or(0)
    }

    /// Returns true if both constants are known to hold the same value.
    ///
    /// Two addresses are the same value when they target the same window of
    /// the same root at the same width.
    pub fn same_value(&self, other: &MemoryConstant) -> bool {
        self == other
    }
}

impl fmt::Display for MemoryConstant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryConstant::Units(units) => write!(f, "{}", units),
            MemoryConstant::Address { target, bits, .. } => write!(f, "&{}:{}", target, bits),
            MemoryConstant::Aggregate(parts) => {
                let parts: Vec<String> = parts.iter().map(|part| part.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            MemoryConstant::Slice {
                source,
                delta,
                size,
            } => write!(f, "{}[{}+{}]", source, delta, size),
        }
    }
}
