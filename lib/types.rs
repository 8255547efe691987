//! Identifiers and small value types used across multiple modules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The byte order the compilation lays multi-unit values out in.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Endian {
    Big,
    Little,
}

impl Default for Endian {
    fn default() -> Endian {
        Endian::Little
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        pub struct $name(usize);

        impl $name {
            pub fn new(index: usize) -> $name {
                $name(index)
            }

            pub fn index(&self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

id_type!(
    /// Identifies a `LogicalMemory` within a `Design`.
    MemoryId,
    "mem"
);
id_type!(
    /// Identifies an `Allocation` within its `LogicalMemory`.
    AllocationId,
    "alloc"
);
id_type!(
    /// Identifies a port of a `LogicalMemory`.
    PortId,
    "port"
);
id_type!(
    /// Identifies a `Register` within a `Design`.
    RegisterId,
    "reg"
);
