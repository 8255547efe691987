use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The number of bits in one addressable unit of a memory.
///
/// A stride policy is fixed per memory. Every value stored in the memory is
/// flattened into units of this width.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct AddressStridePolicy {
    stride: usize,
}

impl AddressStridePolicy {
    /// Byte addressed memory, one unit per 8 bits.
    pub const BYTE_ADDRESSING: AddressStridePolicy = AddressStridePolicy { stride: 8 };

    /// Create a new stride policy. Strides must be between 1 and 64 bits.
    pub fn new(stride: usize) -> Result<AddressStridePolicy, Error> {
        if stride == 0 || stride > 64 {
            return Err(Error::InvalidStride(stride));
        }
        Ok(AddressStridePolicy { stride })
    }

    /// Get the number of bits per addressable unit.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// A mask selecting the low `stride` bits of a value.
    pub fn mask(&self) -> u64 {
        if self.stride == 64 {
            u64::MAX
        } else {
            (1 << self.stride) - 1
        }
    }

    /// The number of units needed to hold a value of `bits` bits.
    pub fn units_for_bits(&self, bits: usize) -> usize {
        (bits + self.stride - 1) / self.stride
    }
}

impl Default for AddressStridePolicy {
    fn default() -> AddressStridePolicy {
        AddressStridePolicy::BYTE_ADDRESSING
    }
}

impl fmt::Display for AddressStridePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stride:{}", self.stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_strides() {
        assert!(matches!(
            AddressStridePolicy::new(0),
            Err(Error::InvalidStride(0))
        ));
        assert!(AddressStridePolicy::new(65).is_err());
        assert_eq!(AddressStridePolicy::new(64).unwrap().mask(), u64::MAX);
    }

    #[test]
    fn units_round_up() {
        let policy = AddressStridePolicy::BYTE_ADDRESSING;
        assert_eq!(policy.units_for_bits(32), 4);
        assert_eq!(policy.units_for_bits(33), 5);
        assert_eq!(policy.units_for_bits(0), 0);
        assert_eq!(AddressStridePolicy::new(16).unwrap().units_for_bits(40), 3);
    }
}
