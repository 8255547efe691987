use crate::graph;
use crate::il::Operation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value-producing node of a `DataflowGraph`.
///
/// `inputs` holds the producer of each input port, in port order. One
/// producer may feed several ports.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Node {
    index: usize,
    operation: Operation,
    inputs: Vec<usize>,
}

impl Node {
    pub(crate) fn new(index: usize, operation: Operation, inputs: Vec<usize>) -> Node {
        Node {
            index,
            operation,
            inputs,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub(crate) fn operation_mut(&mut self) -> &mut Operation {
        &mut self.operation
    }

    pub(crate) fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut Vec<usize> {
        &mut self.inputs
    }
}

impl graph::Vertex for Node {
    fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inputs: Vec<String> = self.inputs.iter().map(|input| format!("n{}", input)).collect();
        write!(f, "n{} = {}({})", self.index, self.operation, inputs.join(", "))
    }
}

/// A dependency from a producer node to a consumer node.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DataEdge {
    head: usize,
    tail: usize,
}

impl DataEdge {
    pub fn new(head: usize, tail: usize) -> DataEdge {
        DataEdge { head, tail }
    }
}

impl graph::Edge for DataEdge {
    fn head(&self) -> usize {
        self.head
    }

    fn tail(&self) -> usize {
        self.tail
    }
}
