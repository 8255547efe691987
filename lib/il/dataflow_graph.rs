use crate::graph::Graph;
use crate::il::{DataEdge, Node, Operation};
use crate::Error;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// A graph of value-producing nodes.
///
/// Edges run from producer to consumer. A node's input ports are kept on the
/// node itself, and the graph holds one edge per distinct producer, so cycles
/// such as loop-carried values are allowed.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DataflowGraph {
    graph: Graph<Node, DataEdge>,
    next_index: usize,
}

impl Default for DataflowGraph {
    fn default() -> DataflowGraph {
        DataflowGraph::new()
    }
}

impl DataflowGraph {
    pub fn new() -> DataflowGraph {
        DataflowGraph {
            graph: Graph::new(),
            next_index: 0,
        }
    }

    /// The underlying dependency graph.
    pub fn graph(&self) -> &Graph<Node, DataEdge> {
        &self.graph
    }

    /// Add a node whose input ports are fed by `inputs`, in order.
    pub fn add_node(&mut self, operation: Operation, inputs: Vec<usize>) -> Result<usize, Error> {
        for input in &inputs {
            if !self.graph.has_vertex(*input) {
                return Err(Error::GraphVertexNotFound(*input));
            }
        }

        let index = self.next_index;
        self.next_index += 1;
        self.graph
            .insert_vertex(Node::new(index, operation, inputs.clone()))?;
        for input in inputs {
            self.connect(input, index)?;
        }
        Ok(index)
    }

    fn connect(&mut self, producer: usize, consumer: usize) -> Result<(), Error> {
        if !self.graph.has_edge(producer, consumer) {
            self.graph.insert_edge(DataEdge::new(producer, consumer))?;
        }
        Ok(())
    }

    // Drop the edge from producer to consumer once no port uses it.
    fn disconnect_unused(&mut self, producer: usize, consumer: usize) -> Result<(), Error> {
        let still_used = self.node(consumer)?.inputs().contains(&producer);
        if !still_used && self.graph.has_edge(producer, consumer) {
            self.graph.remove_edge(producer, consumer)?;
        }
        Ok(())
    }

    pub fn node(&self, index: usize) -> Result<&Node, Error> {
        self.graph.vertex(index)
    }

    pub fn nodes(&self) -> Vec<&Node> {
        self.graph.vertices()
    }

    pub fn operation(&self, index: usize) -> Result<&Operation, Error> {
        Ok(self.node(index)?.operation())
    }

    pub fn operation_mut(&mut self, index: usize) -> Result<&mut Operation, Error> {
        Ok(self.graph.vertex_mut(index)?.operation_mut())
    }

    /// The producer feeding input `port` of `node`.
    pub fn input(&self, node: usize, port: usize) -> Result<usize, Error> {
        self.node(node)?
            .inputs()
            .get(port)
            .cloned()
            .ok_or(Error::MissingInput(node, port))
    }

    /// Feed input `port` of `node` from `producer`. Setting the port one past
    /// the last input adds a new port, which is how back edges are closed.
    pub fn set_input(&mut self, node: usize, port: usize, producer: usize) -> Result<(), Error> {
        if !self.graph.has_vertex(producer) {
            return Err(Error::GraphVertexNotFound(producer));
        }
        let inputs = self.graph.vertex_mut(node)?.inputs_mut();
        let previous = match port {
            port if port < inputs.len() => Some(std::mem::replace(&mut inputs[port], producer)),
            port if port == inputs.len() => {
                inputs.push(producer);
                None
            }
            _ => return Err(Error::MissingInput(node, port)),
        };
        if let Some(previous) = previous {
            self.disconnect_unused(previous, node)?;
        }
        self.connect(producer, node)
    }

    /// Replace the operation and every input of `node`.
    pub fn rewrite(
        &mut self,
        node: usize,
        operation: Operation,
        inputs: Vec<usize>,
    ) -> Result<(), Error> {
        for input in &inputs {
            if !self.graph.has_vertex(*input) {
                return Err(Error::GraphVertexNotFound(*input));
            }
        }
        let vertex = self.graph.vertex_mut(node)?;
        vertex.set_operation(operation);
        let previous = std::mem::replace(vertex.inputs_mut(), inputs.clone());
        for producer in previous {
            self.disconnect_unused(producer, node)?;
        }
        for producer in inputs {
            self.connect(producer, node)?;
        }
        Ok(())
    }

    /// The nodes which consume the value of `node`.
    pub fn users(&self, node: usize) -> Result<Vec<usize>, Error> {
        self.graph.successor_indices(node)
    }

    /// Remove a node. Nodes which still have users can not be removed.
    pub fn remove_node(&mut self, node: usize) -> Result<Node, Error> {
        if !self.users(node)?.is_empty() {
            return Err(Error::Custom(format!("node {} still has users", node)));
        }
        self.graph.remove_vertex(node)
    }

    /// The order the points-to resolver sweeps nodes in.
    ///
    /// Nodes reachable from a node without inputs come first, in reverse post
    /// order, so producers are visited before their consumers wherever the
    /// graph is acyclic. Nodes only reachable through a cycle follow, in the
    /// same order, walking from the lowest index first.
    pub fn sweep_order(&self) -> Result<Vec<usize>, Error> {
        let mut visited: FxHashSet<usize> = FxHashSet::default();
        let mut order = Vec::new();

        let sources: Vec<usize> = self
            .graph
            .sources()
            .into_iter()
            .map(|node| node.index())
            .collect();
        let mut post_order = Vec::new();
        for source in sources {
            self.graph
                .extend_post_order(source, &mut visited, &mut post_order)?;
        }
        order.extend(post_order.into_iter().rev());

        let remaining: Vec<usize> = self
            .graph
            .vertices()
            .into_iter()
            .map(|node| node.index())
            .filter(|index| !visited.contains(index))
            .collect();
        for node in remaining {
            let mut post_order = Vec::new();
            self.graph
                .extend_post_order(node, &mut visited, &mut post_order)?;
            order.extend(post_order.into_iter().rev());
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::Constant;

    fn constant(graph: &mut DataflowGraph, value: u64) -> usize {
        graph
            .add_node(Operation::Constant(Constant::new(value, 32)), vec![])
            .unwrap()
    }

    #[test]
    fn ports_may_share_a_producer() {
        let mut graph = DataflowGraph::new();
        let a = constant(&mut graph, 1);
        let sum = graph.add_node(Operation::Add, vec![a, a]).unwrap();

        assert_eq!(graph.node(sum).unwrap().inputs(), &[a, a]);
        assert_eq!(graph.users(a).unwrap(), vec![sum]);

        let b = constant(&mut graph, 2);
        graph.set_input(sum, 0, b).unwrap();
        // a still feeds port 1
        assert_eq!(graph.users(a).unwrap(), vec![sum]);
        graph.set_input(sum, 1, b).unwrap();
        assert!(graph.users(a).unwrap().is_empty());
    }

    #[test]
    fn back_edges_are_added_as_new_ports() {
        let mut graph = DataflowGraph::new();
        let start = constant(&mut graph, 0);
        let one = constant(&mut graph, 1);
        let latch = graph.add_node(Operation::Latch, vec![start]).unwrap();
        let next = graph.add_node(Operation::Add, vec![latch, one]).unwrap();
        graph.set_input(latch, 1, next).unwrap();

        assert_eq!(graph.input(latch, 1).unwrap(), next);
        assert!(graph.set_input(latch, 5, next).is_err());
        assert!(graph.input(latch, 2).is_err());

        assert_eq!(graph.sweep_order().unwrap(), vec![one, start, latch, next]);
    }

    #[test]
    fn sweep_order_visits_isolated_cycles() {
        let mut graph = DataflowGraph::new();
        let source = constant(&mut graph, 0);
        let first = graph.add_node(Operation::NoOp, vec![source]).unwrap();
        let second = graph.add_node(Operation::NoOp, vec![first]).unwrap();
        // cut the cycle loose from its source
        graph.set_input(first, 0, second).unwrap();

        assert_eq!(graph.sweep_order().unwrap(), vec![source, first, second]);
    }

    #[test]
    fn rewrite_replaces_inputs() {
        let mut graph = DataflowGraph::new();
        let a = constant(&mut graph, 1);
        let b = constant(&mut graph, 2);
        let cast = graph.add_node(Operation::Cast, vec![a]).unwrap();

        graph
            .rewrite(cast, Operation::Constant(Constant::new(3, 8)), vec![])
            .unwrap();
        assert!(graph.users(a).unwrap().is_empty());
        assert!(graph.node(cast).unwrap().inputs().is_empty());

        graph.rewrite(cast, Operation::Cast, vec![b]).unwrap();
        assert_eq!(graph.users(b).unwrap(), vec![cast]);
        assert!(graph.remove_node(b).is_err());
        assert!(graph.remove_node(cast).is_ok());
        assert!(graph.remove_node(b).is_ok());
    }
}
