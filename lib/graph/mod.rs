//! A directed graph keyed by vertex index.
//!
//! `DataflowGraph` stores its nodes here, with one edge from each producer to
//! each of its consumers. Vertices and edges are kept in ordered maps, so
//! every query returns indices in ascending order and traversals are
//! reproducible.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::Error;

pub trait Vertex: Clone {
    fn index(&self) -> usize;
}

pub trait Edge: Clone {
    /// Index of the vertex this edge leaves.
    fn head(&self) -> usize;
    /// Index of the vertex this edge enters.
    fn tail(&self) -> usize;
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
struct Adjacency {
    incoming: BTreeSet<usize>,
    outgoing: BTreeSet<usize>,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Graph<V: Vertex, E: Edge> {
    vertices: BTreeMap<usize, V>,
    edges: BTreeMap<(usize, usize), E>,
    adjacency: BTreeMap<usize, Adjacency>,
}

impl<V: Vertex, E: Edge> Default for Graph<V, E> {
    fn default() -> Graph<V, E> {
        Graph::new()
    }
}

impl<V: Vertex, E: Edge> Graph<V, E> {
    pub fn new() -> Graph<V, E> {
        Graph {
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            adjacency: BTreeMap::new(),
        }
    }

    pub fn has_vertex(&self, index: usize) -> bool {
        self.vertices.contains_key(&index)
    }

    pub fn has_edge(&self, head: usize, tail: usize) -> bool {
        self.edges.contains_key(&(head, tail))
    }

    /// Add `vertex` under its own index.
    ///
    /// # Errors
    /// The index is already taken.
    pub fn insert_vertex(&mut self, vertex: V) -> Result<(), Error> {
        let index = vertex.index();
        if self.has_vertex(index) {
            return Err(format!("vertex {} already exists", index).into());
        }
        self.adjacency.insert(index, Adjacency::default());
        self.vertices.insert(index, vertex);
        Ok(())
    }

    /// Remove a vertex together with every edge entering or leaving it.
    pub fn remove_vertex(&mut self, index: usize) -> Result<V, Error> {
        let vertex = self
            .vertices
            .remove(&index)
            .ok_or(Error::GraphVertexNotFound(index))?;
        let adjacency = self.adjacency.remove(&index).unwrap_or_default();

        for head in adjacency.incoming {
            self.edges.remove(&(head, index));
            if let Some(neighbor) = self.adjacency.get_mut(&head) {
                neighbor.outgoing.remove(&index);
            }
        }
        for tail in adjacency.outgoing {
            self.edges.remove(&(index, tail));
            if let Some(neighbor) = self.adjacency.get_mut(&tail) {
                neighbor.incoming.remove(&index);
            }
        }
        Ok(vertex)
    }

    /// Add `edge` between two existing vertices.
    ///
    /// # Errors
    /// Either end is missing, or the edge already exists.
    pub fn insert_edge(&mut self, edge: E) -> Result<(), Error> {
        let key = (edge.head(), edge.tail());
        for index in [key.0, key.1] {
            if !self.has_vertex(index) {
                return Err(Error::GraphVertexNotFound(index));
            }
        }
        if self.edges.contains_key(&key) {
            return Err(format!("edge ({}, {}) already exists", key.0, key.1).into());
        }
        self.adjacency.entry(key.0).or_default().outgoing.insert(key.1);
        self.adjacency.entry(key.1).or_default().incoming.insert(key.0);
        self.edges.insert(key, edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, head: usize, tail: usize) -> Result<E, Error> {
        let edge = self
            .edges
            .remove(&(head, tail))
            .ok_or(Error::GraphEdgeNotFound(head, tail))?;
        if let Some(adjacency) = self.adjacency.get_mut(&head) {
            adjacency.outgoing.remove(&tail);
        }
        if let Some(adjacency) = self.adjacency.get_mut(&tail) {
            adjacency.incoming.remove(&head);
        }
        Ok(edge)
    }

    fn adjacency(&self, index: usize) -> Result<&Adjacency, Error> {
        self.adjacency
            .get(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    /// Indices of the vertices `index` has an edge to, in ascending order.
    pub fn successor_indices(&self, index: usize) -> Result<Vec<usize>, Error> {
        Ok(self.adjacency(index)?.outgoing.iter().cloned().collect())
    }

    /// Vertices no edge enters.
    pub fn sources(&self) -> Vec<&V> {
        self.vertices
            .iter()
            .filter(|(index, _)| {
                self.adjacency
                    .get(index)
                    .map(|adjacency| adjacency.incoming.is_empty())
                    .unwrap_or(true)
            })
            .map(|(_, vertex)| vertex)
            .collect()
    }

    /// Append to `order` the post order of every vertex reachable from
    /// `start` which is not yet in `visited`. Successors are taken in
    /// ascending order.
    ///
    /// Calling this repeatedly with the same `visited` set walks a graph
    /// from several starting points without repeating a vertex.
    pub fn extend_post_order(
        &self,
        start: usize,
        visited: &mut FxHashSet<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), Error> {
        if !self.has_vertex(start) {
            return Err(Error::GraphVertexNotFound(start));
        }
        if !visited.insert(start) {
            return Ok(());
        }

        let mut stack = vec![(start, self.successor_indices(start)?, 0)];
        while let Some((index, successors, next)) = stack.last_mut() {
            if let Some(successor) = successors.get(*next).cloned() {
                *next += 1;
                if visited.insert(successor) {
                    let successors = self.successor_indices(successor)?;
                    stack.push((successor, successors, 0));
                }
            } else {
                order.push(*index);
                stack.pop();
            }
        }
        Ok(())
    }

    pub fn vertex(&self, index: usize) -> Result<&V, Error> {
        self.vertices
            .get(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    pub fn vertex_mut(&mut self, index: usize) -> Result<&mut V, Error> {
        self.vertices
            .get_mut(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    /// Every vertex, in index order.
    pub fn vertices(&self) -> Vec<&V> {
        self.vertices.values().collect()
    }

    /// Every edge, ordered by head then tail.
    pub fn edges(&self) -> Vec<&E> {
        self.edges.values().collect()
    }
}
