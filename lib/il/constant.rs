//! Literal values carried by `Constant` nodes.
//!
//! Literals are at most 64 bits wide. Wider content lives in `LogicalValue`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A constant value produced by a `Constant` node.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Constant {
    value: u64,
    bits: usize,
}

impl Constant {
    /// `value` is masked to `bits` bits when read back.
    pub fn new(value: u64, bits: usize) -> Constant {
        Constant { value, bits }
    }

    /// The value, masked to the width of this constant.
    pub fn value(&self) -> u64 {
        if self.bits >= 64 {
            self.value
        } else {
            self.value & ((1 << self.bits) - 1)
        }
    }

    /// The value read as a two's complement number, as pointer arithmetic
    /// offsets are.
    pub fn value_i64(&self) -> i64 {
        if self.bits == 0 || self.bits >= 64 {
            return self.value() as i64;
        }
        let shift = 64 - self.bits;
        ((self.value() << shift) as i64) >> shift
    }

    pub fn bits(&self) -> usize {
        self.bits
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:X}:{}", self.value(), self.bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_and_sign_extends() {
        let constant = Constant::new(0x1ff, 8);
        assert_eq!(constant.value(), 0xff);
        assert_eq!(constant.value_i64(), -1);

        assert_eq!(Constant::new(8, 32).value_i64(), 8);
        assert_eq!(Constant::new(0xffff_fff8, 32).value_i64(), -8);
        assert_eq!(Constant::new(u64::MAX, 64).value_i64(), -1);
        assert_eq!(Constant::new(0x10, 8).to_string(), "0x10:8");
    }
}
