//! The symbolic memory model.
//!
//! Memory is modeled at two levels. `Location` describes a region of memory
//! and `LogicalValue` describes what a region holds. Both stay symbolic until
//! the final layout is known. Once content is fixed it is represented as a
//! `UnitBundle` of `AddressableUnit`s, whose width is given by the memory's
//! `AddressStridePolicy`.
//!
//! A `LogicalMemory` owns allocations, ports and the table of resolved
//! accesses. A `DeferredConstant` is the address of a location, which stays
//! unknown until `LogicalMemory` base addresses are assigned and the constant
//! is locked.

mod constant;
mod deferred;
mod location;
mod logical_memory;
mod register;
mod stride;
mod unit;
mod value;

pub use self::constant::MemoryConstant;
pub use self::deferred::DeferredConstant;
pub use self::location::Location;
pub use self::logical_memory::{AccessRegistration, Allocation, LogicalMemory, MemoryPort, PortAccess};
pub use self::register::Register;
pub use self::stride::AddressStridePolicy;
pub use self::unit::{AddressableUnit, UnitBundle};
pub use self::value::LogicalValue;
