//! Bit-exact representation of memory content.
//!
//! Once the content of a region is fixed it is represented as a `UnitBundle`,
//! an ordered sequence of `AddressableUnit`s. Bundles built from numbers are in
//! memory order for the requested `Endian`: the unit at the lowest address
//! comes first. For little endian this is the canonical order, least
//! significant unit first, and swapping endianness is a pure reversal.

use crate::memory::AddressStridePolicy;
use crate::types::Endian;
use crate::Error;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The value of one addressable unit of memory.
///
/// Units which are not locked are indeterminate: their value is not yet
/// known, or nobody cares what it is.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct AddressableUnit {
    value: u64,
    locked: bool,
}

impl AddressableUnit {
    /// Create a locked unit, masking `value` to the stride of `policy`.
    pub fn new(value: u64, policy: AddressStridePolicy) -> AddressableUnit {
        AddressableUnit {
            value: value & policy.mask(),
            locked: true,
        }
    }

    /// A unit whose value is not known.
    pub fn indeterminate() -> AddressableUnit {
        AddressableUnit {
            value: 0,
            locked: false,
        }
    }

    /// A locked unit of value zero.
    pub fn zero() -> AddressableUnit {
        AddressableUnit {
            value: 0,
            locked: true,
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl fmt::Display for AddressableUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.locked {
            write!(f, "{:02x}", self.value)
        } else {
            write!(f, "??")
        }
    }
}

/// An ordered sequence of addressable units, all of the same stride.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct UnitBundle {
    units: Vec<AddressableUnit>,
    policy: AddressStridePolicy,
}

impl UnitBundle {
    pub fn new(units: Vec<AddressableUnit>, policy: AddressStridePolicy) -> UnitBundle {
        UnitBundle { units, policy }
    }

    /// A bundle of `count` indeterminate units.
    pub fn indeterminate(count: usize, policy: AddressStridePolicy) -> UnitBundle {
        UnitBundle::new(vec![AddressableUnit::indeterminate(); count], policy)
    }

    /// A bundle of `count` locked zero units.
    pub fn zeroes(count: usize, policy: AddressStridePolicy) -> UnitBundle {
        UnitBundle::new(vec![AddressableUnit::zero(); count], policy)
    }

    /// Split the low `bits` bits of `value` into units laid out for `endian`.
    pub fn from_value(
        value: u64,
        bits: usize,
        policy: AddressStridePolicy,
        endian: Endian,
    ) -> UnitBundle {
        let value = if bits >= 64 {
            value
        } else {
            value & ((1 << bits) - 1)
        };
        let units = (0..policy.units_for_bits(bits))
            .map(|i| {
                let shift = i * policy.stride();
                if shift >= 64 {
                    AddressableUnit::zero()
                } else {
                    AddressableUnit::new(value >> shift, policy)
                }
            })
            .collect();
        UnitBundle::new(units, policy).in_order(endian)
    }

    /// Split the low `bits` bits of an arbitrarily wide value into units laid
    /// out for `endian`.
    pub fn from_biguint(
        value: &BigUint,
        bits: usize,
        policy: AddressStridePolicy,
        endian: Endian,
    ) -> UnitBundle {
        let value = value & ((BigUint::from(1u8) << bits) - 1u8);
        let mask = BigUint::from(policy.mask());
        let units = (0..policy.units_for_bits(bits))
            .map(|i| {
                let unit = (&value >> (i * policy.stride())) & &mask;
                AddressableUnit::new(unit.to_u64().unwrap_or(0), policy)
            })
            .collect();
        UnitBundle::new(units, policy).in_order(endian)
    }

    fn in_order(self, endian: Endian) -> UnitBundle {
        match endian {
            Endian::Little => self,
            Endian::Big => self.swap_endian(),
        }
    }

    /// Decode this bundle, laid out for `endian`, back into a number.
    ///
    /// Returns `None` if any unit is indeterminate, or if the value does not
    /// fit in 64 bits.
    pub fn to_value(&self, endian: Endian) -> Option<u64> {
        if !self.is_locked() {
            return None;
        }
        let stride = self.policy.stride();
        let mut value = 0u64;
        for (i, unit) in self.little_endian_units(endian).enumerate() {
            let shift = i * stride;
            if shift >= 64 {
                if unit.value() != 0 {
                    return None;
                }
                continue;
            }
            if shift + stride > 64 && (unit.value() >> (64 - shift)) != 0 {
                return None;
            }
            value |= unit.value() << shift;
        }
        Some(value)
    }

    /// Decode this bundle, laid out for `endian`, into an arbitrarily wide
    /// number. Returns `None` if any unit is indeterminate.
    pub fn to_biguint(&self, endian: Endian) -> Option<BigUint> {
        if !self.is_locked() {
            return None;
        }
        let stride = self.policy.stride();
        Some(
            self.little_endian_units(endian)
                .enumerate()
                .fold(BigUint::zero(), |value, (i, unit)| {
                    value | (BigUint::from(unit.value()) << (i * stride))
                }),
        )
    }

    fn little_endian_units(
        &self,
        endian: Endian,
    ) -> Box<dyn Iterator<Item = &AddressableUnit> + '_> {
        match endian {
            Endian::Little => Box::new(self.units.iter()),
            Endian::Big => Box::new(self.units.iter().rev()),
        }
    }

    /// Reverse the order of the units in this bundle.
    pub fn swap_endian(&self) -> UnitBundle {
        UnitBundle::new(self.units.iter().rev().cloned().collect(), self.policy)
    }

    pub fn units(&self) -> &[AddressableUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn policy(&self) -> AddressStridePolicy {
        self.policy
    }

    pub fn bit_size(&self) -> usize {
        self.units.len() * self.policy.stride()
    }

    /// Returns true if every unit in this bundle is locked.
    pub fn is_locked(&self) -> bool {
        self.units.iter().all(|unit| unit.is_locked())
    }

    /// Get `len` units starting at `start`. Units past the end of this bundle
    /// read as locked zero.
    pub fn slice(&self, start: usize, len: usize) -> UnitBundle {
        let units = (start..start + len)
            .map(|i| {
                self.units
                    .get(i)
                    .cloned()
                    .unwrap_or_else(AddressableUnit::zero)
            })
            .collect();
        UnitBundle::new(units, self.policy)
    }

    /// Remove the units in the inclusive range `[min, max]`.
    pub fn without_range(&self, min: usize, max: usize) -> UnitBundle {
        let units = self
            .units
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < min || *i > max)
            .map(|(_, unit)| *unit)
            .collect();
        UnitBundle::new(units, self.policy)
    }

    /// Append the units of `other` to this bundle.
    pub fn append(&mut self, other: &UnitBundle) -> Result<(), Error> {
        if other.policy != self.policy {
            return Err(Error::MixedStride(
                self.policy.stride(),
                other.policy.stride(),
            ));
        }
        self.units.extend_from_slice(&other.units);
        Ok(())
    }
}

impl fmt::Display for UnitBundle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, unit) in self.units.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", unit)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn values(bundle: &UnitBundle) -> Vec<u64> {
        bundle.units().iter().map(|unit| unit.value()).collect()
    }

    #[test]
    fn splits_little_and_big_endian() {
        let policy = AddressStridePolicy::BYTE_ADDRESSING;

        let little = UnitBundle::from_value(0x1122_3344, 32, policy, Endian::Little);
        assert_eq!(values(&little), vec![0x44, 0x33, 0x22, 0x11]);

        let big = UnitBundle::from_value(0x1122_3344, 32, policy, Endian::Big);
        assert_eq!(values(&big), vec![0x11, 0x22, 0x33, 0x44]);

        assert_eq!(little.swap_endian(), big);
        assert_eq!(big.to_value(Endian::Big), Some(0x1122_3344));
        assert_eq!(little.to_value(Endian::Little), Some(0x1122_3344));
        assert_eq!(big.to_value(Endian::Little), Some(0x4433_2211));
    }

    #[test]
    fn wide_strides() {
        let policy = AddressStridePolicy::new(16).unwrap();
        let bundle = UnitBundle::from_value(0x0001_2345, 20, policy, Endian::Little);
        assert_eq!(values(&bundle), vec![0x2345, 0x1]);
        assert_eq!(bundle.to_value(Endian::Little), Some(0x1_2345));
    }

    #[test]
    fn indeterminate_does_not_decode() {
        let policy = AddressStridePolicy::BYTE_ADDRESSING;
        let bundle = UnitBundle::indeterminate(4, policy);
        assert!(!bundle.is_locked());
        assert_eq!(bundle.to_value(Endian::Little), None);
        assert_eq!(bundle.to_biguint(Endian::Little), None);
    }

    #[test]
    fn slice_past_end_reads_zero() {
        let policy = AddressStridePolicy::BYTE_ADDRESSING;
        let bundle = UnitBundle::from_value(0xaabb, 16, policy, Endian::Little);
        let slice = bundle.slice(1, 3);
        assert_eq!(values(&slice), vec![0xaa, 0, 0]);
        assert!(slice.is_locked());
    }

    #[test]
    fn biguint_matches_u64() {
        let policy = AddressStridePolicy::BYTE_ADDRESSING;
        let wide = UnitBundle::from_biguint(&BigUint::from(0xdead_beefu64), 40, policy, Endian::Big);
        let narrow = UnitBundle::from_value(0xdead_beef, 40, policy, Endian::Big);
        assert_eq!(wide, narrow);
        assert_eq!(wide.to_biguint(Endian::Big), Some(BigUint::from(0xdead_beefu64)));
    }

    #[test]
    fn append_rejects_mixed_strides() {
        let mut bytes = UnitBundle::zeroes(2, AddressStridePolicy::BYTE_ADDRESSING);
        let words = UnitBundle::zeroes(1, AddressStridePolicy::new(16).unwrap());
        assert!(matches!(bytes.append(&words), Err(Error::MixedStride(8, 16))));
        assert!(bytes.append(&UnitBundle::zeroes(1, AddressStridePolicy::BYTE_ADDRESSING)).is_ok());
        assert_eq!(bytes.len(), 3);
    }

    #[test]
    fn without_range_punches_units() {
        let policy = AddressStridePolicy::BYTE_ADDRESSING;
        let bundle = UnitBundle::from_value(0x4433_2211, 32, policy, Endian::Little);
        assert_eq!(values(&bundle.without_range(1, 2)), vec![0x11, 0x44]);
    }

    proptest! {
        #[test]
        fn endian_swap_is_an_involution(value in any::<u64>(), bits in 1usize..=64) {
            let policy = AddressStridePolicy::BYTE_ADDRESSING;
            let bundle = UnitBundle::from_value(value, bits, policy, Endian::Big);
            prop_assert_eq!(bundle.swap_endian().swap_endian(), bundle.clone());
            prop_assert_eq!(
                bundle.to_value(Endian::Big),
                UnitBundle::from_value(value, bits, policy, Endian::Little).to_value(Endian::Little)
            );
        }
    }
}
