use crate::il::{Addressing, Constant, DataflowGraph, MemoryAccess, Operation};
use crate::memory::{DeferredConstant, Location, LogicalMemory, LogicalValue, Register};
use crate::options::Options;
use crate::types::{MemoryId, PortId, RegisterId};
use crate::Error;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dataflow graph together with the memories and registers its nodes
/// access, and the options it is compiled with.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Design {
    graph: DataflowGraph,
    memories: BTreeMap<MemoryId, LogicalMemory>,
    registers: BTreeMap<RegisterId, Register>,
    next_memory: usize,
    next_register: usize,
    options: Options,
}

impl Design {
    pub fn new(options: Options) -> Design {
        Design {
            graph: DataflowGraph::new(),
            memories: BTreeMap::new(),
            registers: BTreeMap::new(),
            next_memory: 0,
            next_register: 0,
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn graph(&self) -> &DataflowGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut DataflowGraph {
        &mut self.graph
    }

    /// Create an empty memory with addresses `address_width` bits wide.
    pub fn create_memory(&mut self, address_width: usize) -> MemoryId {
        let id = MemoryId::new(self.next_memory);
        self.next_memory += 1;
        self.memories
            .insert(id, LogicalMemory::new(id, address_width));
        id
    }

    pub fn memory(&self, id: MemoryId) -> Result<&LogicalMemory, Error> {
        self.memories.get(&id).ok_or(Error::UnknownMemory(id))
    }

    pub fn memory_mut(&mut self, id: MemoryId) -> Result<&mut LogicalMemory, Error> {
        self.memories.get_mut(&id).ok_or(Error::UnknownMemory(id))
    }

    pub fn memories(&self) -> impl Iterator<Item = &LogicalMemory> {
        self.memories.values()
    }

    pub fn memory_ids(&self) -> Vec<MemoryId> {
        self.memories.keys().cloned().collect()
    }

    pub(crate) fn memories_mut(&mut self) -> &mut BTreeMap<MemoryId, LogicalMemory> {
        &mut self.memories
    }

    /// Remove a memory. The memory must no longer be targeted by any deferred
    /// constant.
    pub fn remove_memory(&mut self, id: MemoryId) -> Result<LogicalMemory, Error> {
        if !self.memory(id)?.deferred_constants().is_empty() {
            return Err(Error::Custom(format!(
                "{} is still targeted by deferred constants",
                id
            )));
        }
        self.memories.remove(&id).ok_or(Error::UnknownMemory(id))
    }

    /// Allocate a region of `memory` holding `initial_value`.
    pub fn allocate(
        &mut self,
        memory: MemoryId,
        initial_value: LogicalValue,
        name: Option<&str>,
    ) -> Result<Location, Error> {
        Ok(self
            .memory_mut(memory)?
            .allocate(initial_value, name.map(|name| name.to_string())))
    }

    pub fn add_node(&mut self, operation: Operation, inputs: Vec<usize>) -> Result<usize, Error> {
        self.graph.add_node(operation, inputs)
    }

    pub fn add_constant(&mut self, value: u64, bits: usize) -> Result<usize, Error> {
        self.graph
            .add_node(Operation::Constant(Constant::new(value, bits)), vec![])
    }

    /// Add a deferred constant holding the address of `target`, and register
    /// it against the memory which owns `target`.
    pub fn add_deferred_constant(&mut self, target: Location, bits: usize) -> Result<usize, Error> {
        let memory = target.memory().ok_or(Error::InvalidDeferredTarget)?;
        let policy = self.memory(memory)?.stride_policy()?;
        let constant = DeferredConstant::new(target, bits, policy)?;
        let node = self
            .graph
            .add_node(Operation::DeferredAddress(constant), vec![])?;
        self.memory_mut(memory)?.register_deferred_constant(node);
        Ok(node)
    }

    pub fn deferred_constant(&self, node: usize) -> Result<&DeferredConstant, Error> {
        match self.graph.operation(node)? {
            Operation::DeferredAddress(constant) => Ok(constant),
            _ => Err(Error::UnexpectedOperation(node, "deferred address")),
        }
    }

    /// Point a deferred constant at a new target, moving its registration to
    /// the memory which owns the new target.
    pub fn retarget_deferred_constant(&mut self, node: usize, target: Location) -> Result<(), Error> {
        let new_memory = target.memory().ok_or(Error::InvalidDeferredTarget)?;
        self.memory(new_memory)?;
        let old_memory = match self.graph.operation_mut(node)? {
            Operation::DeferredAddress(constant) => {
                let old_memory = constant.target().memory();
                constant.set_target(target)?;
                old_memory
            }
            _ => return Err(Error::UnexpectedOperation(node, "deferred address")),
        };
        if let Some(old_memory) = old_memory {
            if let Some(memory) = self.memories.get_mut(&old_memory) {
                memory.unregister_deferred_constant(node);
            }
        }
        self.memory_mut(new_memory)?.register_deferred_constant(node);
        Ok(())
    }

    /// Lock every deferred constant registered against every memory. Base
    /// addresses must already be assigned. Returns the number of constants
    /// locked.
    ///
    /// Either every constant is locked or, on error, none is.
    pub fn lock_deferred_constants(&mut self) -> Result<usize, Error> {
        let endian = self.options.endian();
        let mut locked = Vec::new();
        for memory in self.memories.values() {
            for node in memory.deferred_constants() {
                match self.graph.operation(*node)? {
                    Operation::DeferredAddress(constant) => {
                        locked.push((*node, constant.locked(memory, endian)?))
                    }
                    _ => return Err(Error::UnexpectedOperation(*node, "deferred address")),
                }
            }
        }

        let count = locked.len();
        for (node, constant) in locked {
            *self.graph.operation_mut(node)? = Operation::DeferredAddress(constant);
        }
        debug!("locked {} deferred constants", count);
        Ok(count)
    }

    /// Add a read of `units` units through `port` of `memory`, at an address
    /// derived from the value of `base`.
    pub fn add_read(
        &mut self,
        memory: MemoryId,
        port: PortId,
        base: usize,
        addressing: Addressing,
        units: usize,
    ) -> Result<usize, Error> {
        self.memory(memory)?.port(port)?;
        self.graph.add_node(
            Operation::Read(MemoryAccess::new(memory, port, addressing, units)),
            vec![base],
        )
    }

    /// Add a write of the value of `value` through `port` of `memory`.
    pub fn add_write(
        &mut self,
        memory: MemoryId,
        port: PortId,
        base: usize,
        value: usize,
        addressing: Addressing,
        units: usize,
    ) -> Result<usize, Error> {
        self.memory(memory)?.port(port)?;
        self.graph.add_node(
            Operation::Write(MemoryAccess::new(memory, port, addressing, units)),
            vec![base, value],
        )
    }

    /// The memory access of a `Read` or `Write` node.
    pub fn access(&self, node: usize) -> Result<&MemoryAccess, Error> {
        self.graph
            .operation(node)?
            .access()
            .ok_or(Error::UnexpectedOperation(node, "memory access"))
    }

    /// Every `Read` and `Write` node in the graph.
    pub fn access_nodes(&self) -> Vec<usize> {
        self.graph
            .nodes()
            .into_iter()
            .filter(|node| node.operation().access().is_some())
            .map(|node| node.index())
            .collect()
    }

    /// Access nodes bound to `memory` which it has no registration for.
    pub fn unresolved_accesses(&self, memory: MemoryId) -> Result<Vec<usize>, Error> {
        let registrations = self.memory(memory)?;
        let mut unresolved = Vec::new();
        for node in self.access_nodes() {
            if self.access(node)?.memory() == memory && registrations.access(node).is_none() {
                unresolved.push(node);
            }
        }
        Ok(unresolved)
    }

    /// Bind an access node to a different memory port.
    pub fn rebind_access(&mut self, node: usize, memory: MemoryId, port: PortId) -> Result<(), Error> {
        self.memory(memory)?.port(port)?;
        self.graph
            .operation_mut(node)?
            .access_mut()
            .ok_or(Error::UnexpectedOperation(node, "memory access"))?
            .rebind(memory, port);
        Ok(())
    }

    // Detach `node` from whatever memory state refers to it, before it is
    // rewritten into something else.
    fn retire(&mut self, node: usize) -> Result<(), Error> {
        let (memory, deferred) = match self.graph.operation(node)? {
            Operation::Read(access) | Operation::Write(access) => (Some(access.memory()), false),
            Operation::DeferredAddress(constant) => (constant.target().memory(), true),
            _ => (None, false),
        };
        if let Some(memory) = memory.and_then(|memory| self.memories.get_mut(&memory)) {
            if deferred {
                memory.unregister_deferred_constant(node);
            } else {
                memory.remove_access(node);
            }
        }
        Ok(())
    }

    /// Turn `node` into a constant. Every user of `node` now sees the
    /// constant.
    pub fn replace_with_constant(&mut self, node: usize, value: u64, bits: usize) -> Result<(), Error> {
        self.retire(node)?;
        self.graph
            .rewrite(node, Operation::Constant(Constant::new(value, bits)), vec![])
    }

    /// Turn `node` into a deferred constant holding the address of `target`.
    pub fn replace_with_deferred_constant(
        &mut self,
        node: usize,
        target: Location,
        bits: usize,
    ) -> Result<(), Error> {
        let memory = target.memory().ok_or(Error::InvalidDeferredTarget)?;
        let policy = self.memory(memory)?.stride_policy()?;
        let constant = DeferredConstant::new(target, bits, policy)?;
        self.retire(node)?;
        self.graph
            .rewrite(node, Operation::DeferredAddress(constant), vec![])?;
        self.memory_mut(memory)?.register_deferred_constant(node);
        Ok(())
    }

    /// Turn a memory access into an access of `register`. A read loses its
    /// base address input, and a write keeps only its value input.
    pub fn replace_with_register_access(&mut self, node: usize, register: RegisterId) -> Result<(), Error> {
        self.register(register)?;
        let (operation, inputs) = match self.graph.operation(node)? {
            Operation::Read(_) => (Operation::RegisterRead(register), vec![]),
            Operation::Write(_) => (
                Operation::RegisterWrite(register),
                vec![self.graph.input(node, 1)?],
            ),
            _ => return Err(Error::UnexpectedOperation(node, "memory access")),
        };
        self.retire(node)?;
        self.graph.rewrite(node, operation, inputs)
    }

    /// Pass every pointer held in the initial value of every allocation and
    /// register through `f`.
    pub(crate) fn map_initial_pointers<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&Location) -> Location,
    {
        for memory in self.memories.values_mut() {
            let updates: Vec<_> = memory
                .allocations()
                .filter(|allocation| !allocation.initial_value().pointer_targets().is_empty())
                .map(|allocation| {
                    (
                        allocation.id(),
                        allocation.initial_value().map_pointers(&mut f),
                    )
                })
                .collect();
            for (allocation, value) in updates {
                memory.set_initial_value(allocation, value)?;
            }
        }
        for register in self.registers.values_mut() {
            if !register.initial_value().pointer_targets().is_empty() {
                let value = register.initial_value().map_pointers(&mut f);
                register.set_initial_value(value);
            }
        }
        Ok(())
    }

    /// Every pointer target held in the initial value of any allocation or
    /// register.
    pub fn initial_pointer_targets(&self) -> Vec<Location> {
        let allocations = self
            .memories
            .values()
            .flat_map(|memory| memory.allocations())
            .map(|allocation| allocation.initial_value());
        let registers = self.registers.values().map(|register| register.initial_value());
        allocations
            .chain(registers)
            .flat_map(|value| value.pointer_targets())
            .cloned()
            .collect()
    }

    pub fn create_register(&mut self, initial_value: LogicalValue, name: Option<&str>) -> RegisterId {
        let id = RegisterId::new(self.next_register);
        self.next_register += 1;
        self.registers.insert(
            id,
            Register::new(id, initial_value, name.map(|name| name.to_string())),
        );
        id
    }

    pub fn register(&self, id: RegisterId) -> Result<&Register, Error> {
        self.registers.get(&id).ok_or(Error::UnknownRegister(id))
    }

    pub fn registers(&self) -> impl Iterator<Item = &Register> {
        self.registers.values()
    }

    pub fn add_register_read(&mut self, register: RegisterId) -> Result<usize, Error> {
        self.register(register)?;
        self.graph
            .add_node(Operation::RegisterRead(register), vec![])
    }

    pub fn add_register_write(&mut self, register: RegisterId, value: usize) -> Result<usize, Error> {
        self.register(register)?;
        self.graph
            .add_node(Operation::RegisterWrite(register), vec![value])
    }

    /// The nodes which read `register`.
    pub fn register_reads(&self, register: RegisterId) -> Vec<usize> {
        self.graph
            .nodes()
            .into_iter()
            .filter(|node| node.operation() == &Operation::RegisterRead(register))
            .map(|node| node.index())
            .collect()
    }

    /// The nodes which write `register`.
    pub fn register_writes(&self, register: RegisterId) -> Vec<usize> {
        self.graph
            .nodes()
            .into_iter()
            .filter(|node| node.operation() == &Operation::RegisterWrite(register))
            .map(|node| node.index())
            .collect()
    }
}
