//! Memory modeling and points-to resolution for a hardware-synthesis IR.
//!
//! Memres sits between the frontend, which lowers loads, stores and
//! address-of operations into a dataflow graph, and the allocation stage,
//! which turns logical memories into fixed-width storage banks. Its job is
//! to decide, for every access in the graph, which region of which logical
//! memory it may touch.
//!
//! The crate is organized leaves first:
//!
//! * `memory` holds the symbolic model: `AddressStridePolicy`,
//! `AddressableUnit` and `UnitBundle`, `Location`, `LogicalValue`,
//! `DeferredConstant` and `LogicalMemory`.
//! * `il` holds the minimal dataflow IR the model is attached to: `Node`,
//! `Operation`, `DataflowGraph` and `Design`.
//! * `analysis` holds the points-to resolver.
//! * `transformation` holds the passes which consume resolved accesses:
//! register conversion, read-only folding, base-address uniquification,
//! ROM replication, dual-porting, memory splitting and memory trimming.
//!
//! A typical pipeline builds a `Design`, runs `analysis::points_to::resolve`,
//! runs any transformations, re-resolves, assigns base addresses, and finally
//! locks every deferred constant with `Design::lock_deferred_constants`.

pub mod analysis;
pub mod graph;
pub mod il;
pub mod memory;
pub mod options;
pub mod transformation;
pub mod types;

#[cfg(test)]
mod tests;

#[cfg(not(feature = "thread_safe"))]
use std::rc::Rc;
#[cfg(not(feature = "thread_safe"))]
pub type RC<T> = Rc<T>;

#[cfg(feature = "thread_safe")]
use std::sync::Arc;
#[cfg(feature = "thread_safe")]
pub type RC<T> = Arc<T>;

use thiserror::Error;
use types::{AllocationId, MemoryId, PortId, RegisterId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Custom(String),
    #[error("Graph vertex not found: {0}")]
    GraphVertexNotFound(usize),
    #[error("Graph edge not found: ({0}, {1})")]
    GraphEdgeNotFound(usize, usize),
    #[error("Node {0} has no input at port {1}")]
    MissingInput(usize, usize),
    #[error("Unknown memory {0}")]
    UnknownMemory(MemoryId),
    #[error("Unknown allocation {1} in memory {0}")]
    UnknownAllocation(MemoryId, AllocationId),
    #[error("Unknown port {1} in memory {0}")]
    UnknownPort(MemoryId, PortId),
    #[error("Unknown register {0}")]
    UnknownRegister(RegisterId),
    #[error("Location {0} does not belong to memory {1}")]
    MemoryMismatch(String, MemoryId),
    #[error("Node {0} is not a {1}")]
    UnexpectedOperation(usize, &'static str),
    #[error("Illegal context for obtaining initial value: {0}")]
    IllegalInitialValueContext(String),
    #[error("Range [{min}, {max}] cannot be removed from {value}")]
    NonRemovableRange {
        value: String,
        min: usize,
        max: usize,
    },
    #[error("Illegal internal state. Location has no address source: {0}")]
    MissingAddressSource(String),
    #[error("Deferred constant targeting {0} is already locked")]
    DeferredConstantLocked(String),
    #[error("Deferred constant cannot target an invalid location")]
    InvalidDeferredTarget,
    #[error("No base address assigned to allocation {1} of memory {0}")]
    NoBaseAddress(MemoryId, AllocationId),
    #[error("Invalid address stride of {0} bits")]
    InvalidStride(usize),
    #[error("Mixed address stride policies: {0} and {1} bits")]
    MixedStride(usize, usize),
    #[error("Points-to resolution did not converge within {0} sweeps")]
    SweepLimitExceeded(usize),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for the conditions a pass is expected to recover from by
    /// abstaining: symbolic initial values and non-decomposable ranges.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::IllegalInitialValueContext(_) | Error::NonRemovableRange { .. }
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Error {
        Error::Custom(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::Custom(s)
    }
}
