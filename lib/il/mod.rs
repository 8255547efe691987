//! The dataflow IR memory resolution runs on.
//!
//! A `Design` owns a `DataflowGraph` of `Node`s, the `LogicalMemory`s those
//! nodes access and the `Register`s created by register conversion. Each node
//! carries an `Operation`, which is the only thing the resolver dispatches on,
//! and an ordered list of input ports.
//!
//! This IR carries only what memory resolution needs. Module boundaries,
//! control, clock and reset wiring, and scheduling belong to the surrounding
//! compiler.

mod constant;
mod dataflow_graph;
mod design;
mod node;
mod operation;

pub use self::constant::Constant;
pub use self::dataflow_graph::DataflowGraph;
pub use self::design::Design;
pub use self::node::{DataEdge, Node};
pub use self::operation::{Addressing, BinaryOperator, MemoryAccess, Operation, UnaryOperator};
