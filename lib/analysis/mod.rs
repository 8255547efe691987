//! Static analysis over the dataflow IR.

pub mod points_to;

pub use self::points_to::{analyze, resolve, AddressSource, PointsTo};
