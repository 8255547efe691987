use crate::il::Constant;
use crate::memory::DeferredConstant;
use crate::types::{MemoryId, PortId, RegisterId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operators which combine two operands and never produce an address of
/// their own.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum BinaryOperator {
    And,
    Or,
    Xor,
    Multiply,
    Divide,
    Modulo,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOperator {
    /// Returns true if only the left operand can carry a pointer through this
    /// operator.
    pub fn left_operand_only(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Divide
                | BinaryOperator::Modulo
                | BinaryOperator::ShiftLeft
                | BinaryOperator::ShiftRight
        )
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum UnaryOperator {
    Not,
    Negate,
}

/// How an access derives the region it touches from its base address.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Addressing {
    /// A constant number of units past the base address, as for a field.
    Offset(i64),
    /// A data dependent number of units past the base address, as for an
    /// array element.
    Indexed,
}

/// The memory port an access is bound to, and the shape of the access.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct MemoryAccess {
    memory: MemoryId,
    port: PortId,
    addressing: Addressing,
    units: usize,
}

impl MemoryAccess {
    pub fn new(memory: MemoryId, port: PortId, addressing: Addressing, units: usize) -> MemoryAccess {
        MemoryAccess {
            memory,
            port,
            addressing,
            units,
        }
    }

    pub fn memory(&self) -> MemoryId {
        self.memory
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// The number of addressable units this access moves.
    pub fn units(&self) -> usize {
        self.units
    }

    /// Bind this access to a different memory port.
    pub fn rebind(&mut self, memory: MemoryId, port: PortId) {
        self.memory = memory;
        self.port = port;
    }
}

/// The kind of a dataflow node, which decides how values flow through it.
///
/// Inputs are positional. `Read` takes its base address at port 0. `Write`
/// takes its base address at port 0 and the stored value at port 1.
/// `RegisterWrite` takes the stored value at port 0. `Mux` inputs are its
/// data inputs only.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Operation {
    Constant(Constant),
    DeferredAddress(DeferredConstant),
    Cast,
    SignExtend,
    ZeroExtend,
    NoOp,
    Latch,
    Mux,
    Add,
    Subtract,
    Binary(BinaryOperator),
    Unary(UnaryOperator),
    Compare,
    Read(MemoryAccess),
    Write(MemoryAccess),
    RegisterRead(RegisterId),
    RegisterWrite(RegisterId),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Constant(_) => "constant",
            Operation::DeferredAddress(_) => "deferred address",
            Operation::Cast => "cast",
            Operation::SignExtend => "sign extend",
            Operation::ZeroExtend => "zero extend",
            Operation::NoOp => "no-op",
            Operation::Latch => "latch",
            Operation::Mux => "mux",
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Binary(_) => "binary",
            Operation::Unary(_) => "unary",
            Operation::Compare => "compare",
            Operation::Read(_) => "read",
            Operation::Write(_) => "write",
            Operation::RegisterRead(_) => "register read",
            Operation::RegisterWrite(_) => "register write",
        }
    }

    /// Returns true for nodes whose value is known without looking at their
    /// inputs.
    pub fn is_constant(&self) -> bool {
        matches!(self, Operation::Constant(_) | Operation::DeferredAddress(_))
    }

    /// The memory access of a `Read` or `Write`.
    pub fn access(&self) -> Option<&MemoryAccess> {
        match self {
            Operation::Read(access) | Operation::Write(access) => Some(access),
            _ => None,
        }
    }

    pub fn access_mut(&mut self) -> Option<&mut MemoryAccess> {
        match self {
            Operation::Read(access) | Operation::Write(access) => Some(access),
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Operation::Write(_))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Constant(constant) => write!(f, "{}", constant),
            Operation::DeferredAddress(constant) => write!(f, "{}", constant),
            Operation::Binary(operator) => write!(f, "{:?}", operator),
            Operation::Unary(operator) => write!(f, "{:?}", operator),
            Operation::Read(access) => write!(f, "read {}.{}", access.memory(), access.port()),
            Operation::Write(access) => write!(f, "write {}.{}", access.memory(), access.port()),
            Operation::RegisterRead(register) => write!(f, "read {}", register),
            Operation::RegisterWrite(register) => write!(f, "write {}", register),
            _ => write!(f, "{}", self.name()),
        }
    }
}
