use crate::memory::{AddressStridePolicy, Location, LogicalMemory, MemoryConstant, UnitBundle};
use crate::types::Endian;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The address of a `Location`, as a constant whose value is not known until
/// the memory layout is final.
///
/// A deferred constant starts unlocked, with every unit indeterminate. While
/// unlocked it may be retargeted. Once base addresses are assigned, `lock`
/// fixes its units to the target's address, and the constant never changes
/// again.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct DeferredConstant {
    target: Location,
    bits: usize,
    policy: AddressStridePolicy,
    units: UnitBundle,
    locked: bool,
}

impl DeferredConstant {
    /// Create an unlocked constant for the address of `target`, `bits` wide.
    pub fn new(
        target: Location,
        bits: usize,
        policy: AddressStridePolicy,
    ) -> Result<DeferredConstant, Error> {
        if target.is_invalid() {
            return Err(Error::InvalidDeferredTarget);
        }
        Ok(DeferredConstant {
            target,
            bits,
            policy,
            units: UnitBundle::indeterminate(policy.units_for_bits(bits), policy),
            locked: false,
        })
    }

    pub fn target(&self) -> &Location {
        &self.target
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn policy(&self) -> AddressStridePolicy {
        self.policy
    }

    /// The units of this constant. Every unit is indeterminate until the
    /// constant is locked.
    pub fn units(&self) -> &UnitBundle {
        &self.units
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Point this constant at a new target.
    ///
    /// # Errors
    /// A locked constant can not be retargeted, and no constant may target
    /// `Location::Invalid`.
    pub fn set_target(&mut self, target: Location) -> Result<(), Error> {
        if self.locked {
            return Err(Error::DeferredConstantLocked(self.target.to_string()));
        }
        if target.is_invalid() {
            return Err(Error::InvalidDeferredTarget);
        }
        self.target = target;
        Ok(())
    }

    /// Fix the units of this constant to the address `memory` assigns its
    /// target, laid out for `endian`.
    ///
    /// # Errors
    /// Locking twice is an error, as is locking against a memory which does
    /// not own the target or has not assigned it an address.
    pub fn lock(&mut self, memory: &LogicalMemory, endian: Endian) -> Result<(), Error> {
        *self = self.locked(memory, endian)?;
        Ok(())
    }

    /// A locked copy of this constant, leaving this one untouched. Fails
    /// exactly where `lock` fails.
    pub fn locked(&self, memory: &LogicalMemory, endian: Endian) -> Result<DeferredConstant, Error> {
        if self.locked {
            return Err(Error::DeferredConstantLocked(self.target.to_string()));
        }
        let address = memory.address(&self.target)?;
        let policy = memory.stride_policy()?;
        Ok(DeferredConstant {
            target: self.target.clone(),
            bits: self.bits,
            policy,
            units: UnitBundle::from_value(address, self.bits, policy, endian),
            locked: true,
        })
    }

    /// The numeric value of this constant once locked.
    pub fn value(&self, endian: Endian) -> Option<u64> {
        if !self.locked {
            return None;
        }
        self.units.to_value(endian)
    }

    /// Returns true if both constants are known to hold the same value.
    ///
    /// Unlocked constants have no value yet, so they compare by target window
    /// and width. Locked constants compare by their units.
    pub fn same_value(&self, other: &DeferredConstant) -> bool {
        match (self.locked, other.locked) {
            (false, false) => {
                self.target.root_key() == other.target.root_key()
                    && self.target.abs_min_delta() == other.target.abs_min_delta()
                    && self.target.abs_max_delta() == other.target.abs_max_delta()
                    && self.bits == other.bits
            }
            (true, true) => self.units == other.units,
            _ => false,
        }
    }

    /// This constant as a `MemoryConstant`.
    pub fn to_constant(&self) -> MemoryConstant {
        if self.locked {
            MemoryConstant::Units(self.units.clone())
        } else {
            MemoryConstant::Address {
                target: self.target.clone(),
                bits: self.bits,
                policy: self.policy,
            }
        }
    }
}

impl fmt::Display for DeferredConstant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.locked {
            write!(f, "&{} = {}", self.target, self.units)
        } else {
            write!(f, "&{}", self.target)
        }
    }
}
