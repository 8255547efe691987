//! Symbolic memory content.
//!
//! A `LogicalValue` describes what a region of memory holds, as opposed to a
//! `Location`, which describes the region itself. Values are built from four
//! pieces: scalars with a known (possibly indeterminate) bit pattern,
//! pointers to a `Location`, records of sub-values laid out back to back,
//! and slices of another value.

use crate::memory::{AddressStridePolicy, Location, MemoryConstant, UnitBundle};
use crate::types::Endian;
use crate::Error;
use num_bigint::BigInt;
use num_traits::Signed;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum LogicalValue {
    /// A bit pattern, one entry per addressable unit.
    Scalar(UnitBundle),
    /// The address of `target`, `bits` wide, stored in units of `policy`.
    Pointer {
        target: Location,
        bits: usize,
        policy: AddressStridePolicy,
    },
    /// Sub-values laid out back to back. The offset of each value is the sum
    /// of the sizes of the values before it.
    Record(Vec<LogicalValue>),
    /// `size` units of `source`, starting `delta` units in. Units past the
    /// end of `source` read as zero.
    Slice {
        source: Box<LogicalValue>,
        delta: usize,
        size: usize,
    },
}

impl LogicalValue {
    /// A scalar holding the low `bits` bits of `value`.
    pub fn scalar(
        value: u64,
        bits: usize,
        policy: AddressStridePolicy,
        endian: Endian,
    ) -> LogicalValue {
        LogicalValue::Scalar(UnitBundle::from_value(value, bits, policy, endian))
    }

    /// A scalar holding `value` in two's complement at a width of `bits`.
    pub fn scalar_from_bigint(
        value: &BigInt,
        bits: usize,
        policy: AddressStridePolicy,
        endian: Endian,
    ) -> LogicalValue {
        let modulus = BigInt::from(1) << bits;
        let value = if value.is_negative() {
            ((value % &modulus) + &modulus) % &modulus
        } else {
            value % &modulus
        };
        LogicalValue::Scalar(UnitBundle::from_biguint(
            &value.to_biguint().unwrap_or_default(),
            bits,
            policy,
            endian,
        ))
    }

    /// A scalar of `size` units whose content is unknown.
    pub fn indeterminate(size: usize, policy: AddressStridePolicy) -> LogicalValue {
        LogicalValue::Scalar(UnitBundle::indeterminate(size, policy))
    }

    /// A scalar of `size` zero units.
    pub fn zero(size: usize, policy: AddressStridePolicy) -> LogicalValue {
        LogicalValue::Scalar(UnitBundle::zeroes(size, policy))
    }

    pub fn pointer(target: Location, bits: usize, policy: AddressStridePolicy) -> LogicalValue {
        LogicalValue::Pointer {
            target,
            bits,
            policy,
        }
    }

    pub fn record(values: Vec<LogicalValue>) -> LogicalValue {
        LogicalValue::Record(values)
    }

    /// `size` units of `source` starting at `delta`. A slice of the whole
    /// source is the source itself, and slices of slices collapse onto the
    /// innermost source.
    pub fn slice(source: LogicalValue, delta: usize, size: usize) -> LogicalValue {
        if delta == 0 && size == source.size() {
            return source;
        }
        match source {
            LogicalValue::Slice {
                source,
                delta: inner,
                ..
            } => LogicalValue::slice(*source, inner + delta, size),
            source => LogicalValue::Slice {
                source: Box::new(source),
                delta,
                size,
            },
        }
    }

    /// The size of this value in addressable units.
    pub fn size(&self) -> usize {
        match self {
            LogicalValue::Scalar(units) => units.len(),
            LogicalValue::Pointer { bits, policy, .. } => policy.units_for_bits(*bits),
            LogicalValue::Record(values) => values.iter().map(|value| value.size()).sum(),
            LogicalValue::Slice { size, .. } => *size,
        }
    }

    /// The size of this value in bits.
    pub fn bit_size(&self) -> usize {
        match self {
            LogicalValue::Scalar(units) => units.bit_size(),
            LogicalValue::Pointer { bits, .. } => *bits,
            LogicalValue::Record(values) => values.iter().map(|value| value.bit_size()).sum(),
            LogicalValue::Slice { source, size, .. } => source
                .stride_policy()
                .map(|policy| policy.stride() * size)
                .unwrap_or(0),
        }
    }

    /// The stride policy of this value. Every component of a record must
    /// share one policy.
    pub fn stride_policy(&self) -> Result<AddressStridePolicy, Error> {
        match self {
            LogicalValue::Scalar(units) => Ok(units.policy()),
            LogicalValue::Pointer { policy, .. } => Ok(*policy),
            LogicalValue::Slice { source, .. } => source.stride_policy(),
            LogicalValue::Record(values) => {
                let mut policies = values.iter().map(|value| value.stride_policy());
                let first = policies
                    .next()
                    .ok_or_else(|| Error::from("empty record has no stride policy"))??;
                for policy in policies {
                    let policy = policy?;
                    if policy != first {
                        return Err(Error::MixedStride(first.stride(), policy.stride()));
                    }
                }
                Ok(first)
            }
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, LogicalValue::Pointer { .. })
    }

    /// The location this value points to. Only a pure pointer points
    /// anywhere, every other value gives `Location::Invalid`.
    pub fn to_location(&self) -> Location {
        match self {
            LogicalValue::Pointer { target, .. } => target.clone(),
            _ => Location::Invalid,
        }
    }

    /// The components of a record with their offsets. Any other value is a
    /// single component at offset zero.
    pub fn components(&self) -> Vec<(usize, &LogicalValue)> {
        match self {
            LogicalValue::Record(values) => {
                let mut offset = 0;
                values
                    .iter()
                    .map(|value| {
                        let component = (offset, value);
                        offset += value.size();
                        component
                    })
                    .collect()
            }
            _ => vec![(0, self)],
        }
    }

    /// The `size` units of this value starting at `delta`.
    pub fn value_at_offset(&self, delta: usize, size: usize) -> LogicalValue {
        LogicalValue::slice(self.clone(), delta, size)
    }

    /// The bit pattern of this value, or `None` if the value holds a pointer
    /// whose address is not yet known.
    pub fn units(&self) -> Option<UnitBundle> {
        match self {
            LogicalValue::Scalar(units) => Some(units.clone()),
            LogicalValue::Pointer { .. } => None,
            LogicalValue::Record(values) => {
                let mut values = values.iter();
                let mut units = values.next()?.units()?;
                for value in values {
                    units.append(&value.units()?).ok()?;
                }
                Some(units)
            }
            LogicalValue::Slice {
                source,
                delta,
                size,
            } => source.units().map(|units| units.slice(*delta, *size)),
        }
    }

    /// Convert this value into a constant.
    ///
    /// # Errors
    /// `Error::IllegalInitialValueContext` if the value holds a pointer whose
    /// target is not a single fixed region.
    pub fn to_constant(&self) -> Result<MemoryConstant, Error> {
        Ok(match self {
            LogicalValue::Scalar(units) => MemoryConstant::Units(units.clone()),
            LogicalValue::Pointer {
                target,
                bits,
                policy,
            } => {
                if !target.is_fixed() {
                    return Err(Error::IllegalInitialValueContext(format!(
                        "address of {} is not statically known",
                        target
                    )));
                }
                MemoryConstant::Address {
                    target: target.clone(),
                    bits: *bits,
                    policy: *policy,
                }
            }
            LogicalValue::Record(values) => MemoryConstant::Aggregate(
                values
                    .iter()
                    .map(|value| value.to_constant())
                    .collect::<Result<Vec<MemoryConstant>, Error>>()?,
            ),
            LogicalValue::Slice {
                source,
                delta,
                size,
            } => MemoryConstant::Slice {
                source: Box::new(source.to_constant()?),
                delta: *delta,
                size: *size,
            },
        })
    }

    fn check_range(&self, min: usize, max: usize) -> Result<(), Error> {
        if min > max || max >= self.size() {
            return Err(format!(
                "range [{}, {}] is outside of a value of {} units",
                min,
                max,
                self.size()
            )
            .into());
        }
        Ok(())
    }

    /// Returns true if `remove_range(min, max)` would succeed.
    pub fn can_remove_range(&self, min: usize, max: usize) -> bool {
        if self.check_range(min, max).is_err() {
            return false;
        }
        match self {
            LogicalValue::Scalar(_) | LogicalValue::Slice { .. } => true,
            LogicalValue::Pointer { .. } => false,
            LogicalValue::Record(_) => self.components().into_iter().all(|(offset, value)| {
                match clip(offset, value.size(), min, max) {
                    Clip::Keep | Clip::Drop => true,
                    Clip::Partial(min, max) => value.can_remove_range(min, max),
                }
            }),
        }
    }

    /// Remove the units `[min, max]` from this value, shifting everything
    /// after `max` down.
    ///
    /// # Errors
    /// `Error::NonRemovableRange` if the range cuts through an indivisible
    /// value, such as a pointer.
    pub fn remove_range(&self, min: usize, max: usize) -> Result<LogicalValue, Error> {
        self.check_range(min, max)?;
        match self {
            LogicalValue::Scalar(units) => Ok(LogicalValue::Scalar(units.without_range(min, max))),
            LogicalValue::Pointer { .. } => Err(Error::NonRemovableRange {
                value: self.to_string(),
                min,
                max,
            }),
            LogicalValue::Record(_) => {
                let mut values = Vec::new();
                for (offset, value) in self.components() {
                    match clip(offset, value.size(), min, max) {
                        Clip::Keep => values.push(value.clone()),
                        Clip::Drop => {}
                        Clip::Partial(min, max) => values.push(value.remove_range(min, max)?),
                    }
                }
                Ok(LogicalValue::Record(values))
            }
            LogicalValue::Slice {
                source,
                delta,
                size,
            } => {
                let source = source.as_ref().clone();
                let last = size - 1;
                Ok(if min == 0 && max == last {
                    LogicalValue::Record(Vec::new())
                } else if min == 0 {
                    LogicalValue::slice(source, delta + max + 1, last - max)
                } else if max == last {
                    LogicalValue::slice(source, *delta, min)
                } else {
                    LogicalValue::Record(vec![
                        LogicalValue::slice(source.clone(), *delta, min),
                        LogicalValue::slice(source, delta + max + 1, last - max),
                    ])
                })
            }
        }
    }

    /// Every pointer target held in this value.
    pub fn pointer_targets(&self) -> Vec<&Location> {
        match self {
            LogicalValue::Scalar(_) => Vec::new(),
            LogicalValue::Pointer { target, .. } => vec![target],
            LogicalValue::Record(values) => values
                .iter()
                .flat_map(|value| value.pointer_targets())
                .collect(),
            LogicalValue::Slice { source, .. } => source.pointer_targets(),
        }
    }

    /// Rebuild this value with every pointer target passed through `f`.
    pub fn map_pointers<F>(&self, f: &mut F) -> LogicalValue
    where
        F: FnMut(&Location) -> Location,
    {
        match self {
            LogicalValue::Scalar(_) => self.clone(),
            LogicalValue::Pointer {
                target,
                bits,
                policy,
            } => LogicalValue::pointer(f(target), *bits, *policy),
            LogicalValue::Record(values) => {
                LogicalValue::Record(values.iter().map(|value| value.map_pointers(f)).collect())
            }
            LogicalValue::Slice {
                source,
                delta,
                size,
            } => LogicalValue::Slice {
                source: Box::new(source.map_pointers(f)),
                delta: *delta,
                size: *size,
            },
        }
    }
}

enum Clip {
    Keep,
    Drop,
    Partial(usize, usize),
}

// How removing [min, max] affects a component at [offset, offset + size).
fn clip(offset: usize, size: usize, min: usize, max: usize) -> Clip {
    if size == 0 || offset + size <= min || offset > max {
        Clip::Keep
    } else if min <= offset && offset + size - 1 <= max {
        Clip::Drop
    } else {
        Clip::Partial(
            min.max(offset) - offset,
            max.min(offset + size - 1) - offset,
        )
    }
}

impl fmt::Display for LogicalValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogicalValue::Scalar(units) => write!(f, "{}", units),
            LogicalValue::Pointer { target, .. } => write!(f, "&{}", target),
            LogicalValue::Record(values) => {
                write!(f, "{{")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "}}")
            }
            LogicalValue::Slice {
                source,
                delta,
                size,
            } => write!(f, "{}[{}+{}]", source, delta, size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AllocationId, MemoryId};

    const BYTES: AddressStridePolicy = AddressStridePolicy::BYTE_ADDRESSING;

    fn scalar(value: u64, bits: usize) -> LogicalValue {
        LogicalValue::scalar(value, bits, BYTES, Endian::Little)
    }

    fn target() -> Location {
        Location::root(MemoryId::new(0), AllocationId::new(0), 16)
    }

    fn unit_values(value: &LogicalValue) -> Vec<u64> {
        value
            .units()
            .unwrap()
            .units()
            .iter()
            .map(|unit| unit.value())
            .collect()
    }

    #[test]
    fn record_offsets_are_cumulative() {
        let record = LogicalValue::record(vec![
            scalar(1, 8),
            LogicalValue::pointer(target(), 32, BYTES),
            scalar(2, 16),
        ]);

        let offsets: Vec<usize> = record.components().iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 1, 5]);
        assert_eq!(record.size(), 7);
        assert_eq!(record.bit_size(), 56);
        assert_eq!(record.stride_policy().unwrap(), BYTES);
    }

    #[test]
    fn record_rejects_mixed_strides() {
        let words = AddressStridePolicy::new(16).unwrap();
        let record = LogicalValue::record(vec![
            scalar(1, 8),
            LogicalValue::scalar(1, 16, words, Endian::Little),
        ]);
        assert!(matches!(record.stride_policy(), Err(Error::MixedStride(8, 16))));
    }

    #[test]
    fn slice_reads_its_source() {
        let source = scalar(0x4433_2211, 32);
        let slice = LogicalValue::slice(source.clone(), 1, 2);

        assert_eq!(unit_values(&slice), vec![0x22, 0x33]);
        assert_eq!(
            slice.value_at_offset(0, 2).units(),
            source.value_at_offset(1, 2).units()
        );
        assert_eq!(slice.value_at_offset(1, 1), source.value_at_offset(2, 1));
        assert_eq!(slice.stride_policy().unwrap(), BYTES);
    }

    #[test]
    fn slice_past_end_reads_zero() {
        let slice = LogicalValue::slice(scalar(0xffff, 16), 1, 3);
        assert_eq!(unit_values(&slice), vec![0xff, 0, 0]);
    }

    #[test]
    fn whole_slice_is_the_source() {
        let source = scalar(7, 32);
        assert_eq!(LogicalValue::slice(source.clone(), 0, 4), source);
    }

    #[test]
    fn only_pointers_have_locations() {
        assert!(scalar(1, 8).to_location().is_invalid());
        assert_eq!(
            LogicalValue::pointer(target(), 32, BYTES).to_location(),
            target()
        );
    }

    #[test]
    fn pointers_to_indices_have_no_constant() {
        let fixed = LogicalValue::pointer(target().create_offset(4, 4), 32, BYTES);
        assert!(matches!(
            fixed.to_constant(),
            Ok(MemoryConstant::Address { .. })
        ));

        let indexed = LogicalValue::pointer(target().create_index(4), 32, BYTES);
        let error = indexed.to_constant().unwrap_err();
        assert!(matches!(error, Error::IllegalInitialValueContext(_)));
        assert!(error.is_recoverable());
    }

    #[test]
    fn bare_pointer_is_not_removable() {
        let pointer = LogicalValue::pointer(target(), 32, BYTES);
        assert!(!pointer.can_remove_range(0, 1));
        let error = pointer.remove_range(0, 1).unwrap_err();
        assert!(matches!(error, Error::NonRemovableRange { .. }));
        assert!(error.is_recoverable());
    }

    #[test]
    fn record_drops_whole_components() {
        let record = LogicalValue::record(vec![
            scalar(0x2211, 16),
            LogicalValue::pointer(target(), 32, BYTES),
            scalar(0x33, 8),
        ]);

        assert!(record.can_remove_range(2, 5));
        let trimmed = record.remove_range(2, 5).unwrap();
        assert_eq!(trimmed.size(), 3);
        assert_eq!(unit_values(&trimmed), vec![0x11, 0x22, 0x33]);

        assert!(!record.can_remove_range(3, 6));
        assert!(record.remove_range(3, 6).is_err());
    }

    #[test]
    fn scalar_punches_units() {
        let trimmed = scalar(0x4433_2211, 32).remove_range(1, 2).unwrap();
        assert_eq!(unit_values(&trimmed), vec![0x11, 0x44]);
        assert!(scalar(1, 8).remove_range(1, 1).is_err());
    }

    #[test]
    fn slice_removal_truncates_or_splits() {
        let source = scalar(0x6655_4433_2211, 48);
        let slice = LogicalValue::slice(source, 1, 4);

        assert_eq!(unit_values(&slice.remove_range(0, 0).unwrap()), vec![0x33, 0x44, 0x55]);
        assert_eq!(unit_values(&slice.remove_range(2, 3).unwrap()), vec![0x22, 0x33]);

        let split = slice.remove_range(1, 2).unwrap();
        assert!(matches!(split, LogicalValue::Record(_)));
        assert_eq!(unit_values(&split), vec![0x22, 0x55]);
    }

    #[test]
    fn negative_bigint_scalars_are_twos_complement() {
        let value = LogicalValue::scalar_from_bigint(&BigInt::from(-2), 16, BYTES, Endian::Little);
        assert_eq!(unit_values(&value), vec![0xfe, 0xff]);

        let value = LogicalValue::scalar_from_bigint(&BigInt::from(0x1234), 16, BYTES, Endian::Big);
        assert_eq!(unit_values(&value), vec![0x12, 0x34]);
    }

    #[test]
    fn map_pointers_retargets_nested_values() {
        let other = Location::root(MemoryId::new(1), AllocationId::new(3), 16);
        let record = LogicalValue::record(vec![
            scalar(1, 8),
            LogicalValue::pointer(target(), 32, BYTES),
        ]);

        let moved = record.map_pointers(&mut |_| other.clone());
        assert_eq!(moved.pointer_targets(), vec![&other]);
        assert_eq!(record.pointer_targets(), vec![&target()]);
    }
}
