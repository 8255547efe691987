//! Points-to resolution.
//!
//! The resolver walks the dataflow graph of a `Design` until it reaches a
//! fixed point, tracking which `LogicalValue`s may reach every node, every
//! `Location` and every register. Pointer facts flowing into the base input
//! of a memory access decide the locations that access may touch.
//!
//! Pointer arithmetic with a constant produces a new `Offset` location.
//! Inside a loop this would produce a new location on every sweep, so every
//! location remembers the nodes which created it. When an arithmetic node
//! sees one of its own locations come back around, it widens the result to
//! an `Index` instead.
//!
//! Once nothing grows, every access is registered against its memory port
//! with exactly the locations found for it.

use crate::il::{Addressing, Design, MemoryAccess, Operation};
use crate::memory::{AccessRegistration, AddressStridePolicy, Location, LogicalValue};
use crate::types::{MemoryId, RegisterId};
use crate::Error;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The root producer of a pointer.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum AddressSource {
    /// A deferred address constant node.
    Node(usize),
    /// A pointer held in the initial value of an allocation, at the given
    /// location.
    InitialValue(Location),
    /// A pointer held in the initial value of a register.
    RegisterInitialValue(RegisterId),
}

impl AddressSource {
    /// Returns true if this source is a deferred constant, which can be
    /// pointed somewhere else.
    pub fn is_retargetable(&self) -> bool {
        matches!(self, AddressSource::Node(_))
    }
}

/// The results of a points-to resolution.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PointsTo {
    accessed: BTreeMap<usize, BTreeSet<Location>>,
    address_sources: BTreeMap<usize, BTreeSet<AddressSource>>,
    node_values: BTreeMap<usize, BTreeSet<LogicalValue>>,
    location_values: BTreeMap<Location, BTreeSet<LogicalValue>>,
    register_values: BTreeMap<RegisterId, BTreeSet<LogicalValue>>,
    sweeps: usize,
    location_sweeps: usize,
    history: Vec<usize>,
}

impl PointsTo {
    /// The locations an access node may touch, including any outside of the
    /// memory it is bound to.
    pub fn accessed_locations(&self, node: usize) -> Option<&BTreeSet<Location>> {
        self.accessed.get(&node)
    }

    /// Every access node with at least one resolved location.
    pub fn accesses(&self) -> impl Iterator<Item = (&usize, &BTreeSet<Location>)> {
        self.accessed
            .iter()
            .filter(|(_, locations)| !locations.is_empty())
    }

    /// The root pointer producers which contribute to the base address of an
    /// access node.
    pub fn address_sources(&self, node: usize) -> Option<&BTreeSet<AddressSource>> {
        self.address_sources.get(&node)
    }

    pub fn node_values(&self, node: usize) -> Option<&BTreeSet<LogicalValue>> {
        self.node_values.get(&node)
    }

    /// The locations pointed to by the values reaching `node`.
    pub fn node_locations(&self, node: usize) -> BTreeSet<Location> {
        self.node_values
            .get(&node)
            .map(|values| {
                values
                    .iter()
                    .map(|value| value.to_location())
                    .filter(|location| !location.is_invalid())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn location_values(&self, location: &Location) -> Option<&BTreeSet<LogicalValue>> {
        self.location_values.get(location)
    }

    pub fn register_values(&self, register: RegisterId) -> Option<&BTreeSet<LogicalValue>> {
        self.register_values.get(&register)
    }

    /// The number of sweeps run, including the final sweep which changed
    /// nothing.
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// The number of sweeps which created at least one new location.
    pub fn location_sweeps(&self) -> usize {
        self.location_sweeps
    }

    /// The total number of facts held after each sweep.
    pub fn history(&self) -> &[usize] {
        &self.history
    }
}

// A pointer fact, taken apart.
#[derive(Clone, Debug)]
struct PointerFact {
    value: LogicalValue,
    target: Location,
    bits: usize,
    policy: AddressStridePolicy,
}

impl PointerFact {
    fn pointer_to(&self, target: Location) -> LogicalValue {
        LogicalValue::pointer(target, self.bits, self.policy)
    }
}

// Where a fact is held. Address sources are tracked per holder, so two
// equal pointers produced by different nodes keep apart their sources.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Holder {
    Node(usize),
    Location(Location),
    Register(RegisterId),
}

struct Resolver<'d> {
    design: &'d Design,
    node_facts: BTreeMap<usize, BTreeSet<LogicalValue>>,
    location_facts: BTreeMap<Location, BTreeSet<LogicalValue>>,
    register_facts: BTreeMap<RegisterId, BTreeSet<LogicalValue>>,
    accessed: BTreeMap<usize, BTreeSet<Location>>,
    access_sources: BTreeMap<usize, BTreeSet<AddressSource>>,
    sources: BTreeMap<(Holder, LogicalValue), BTreeSet<AddressSource>>,
    created_by: BTreeMap<Location, BTreeSet<usize>>,
    modified: bool,
    created: bool,
}

impl<'d> Resolver<'d> {
    fn new(design: &'d Design) -> Resolver<'d> {
        Resolver {
            design,
            node_facts: BTreeMap::new(),
            location_facts: BTreeMap::new(),
            register_facts: BTreeMap::new(),
            accessed: BTreeMap::new(),
            access_sources: BTreeMap::new(),
            sources: BTreeMap::new(),
            created_by: BTreeMap::new(),
            modified: false,
            created: false,
        }
    }

    fn run(mut self) -> Result<PointsTo, Error> {
        self.seed()?;

        let order = self.design.graph().sweep_order()?;
        let limit = self.design.options().sweep_limit();
        let mut sweeps = 0;
        let mut location_sweeps = 0;
        let mut history = Vec::new();

        loop {
            if let Some(limit) = limit {
                if sweeps >= limit {
                    return Err(Error::SweepLimitExceeded(limit));
                }
            }

            self.modified = false;
            self.created = false;
            for node in &order {
                self.visit(*node)?;
            }

            sweeps += 1;
            if self.created {
                location_sweeps += 1;
            }
            history.push(self.fact_count());
            debug!(
                "sweep {}: {} facts, {} locations{}",
                sweeps,
                self.fact_count(),
                self.created_by.len(),
                if self.modified { "" } else { ", quiescent" }
            );

            if !self.modified {
                break;
            }
        }

        Ok(PointsTo {
            accessed: self.accessed,
            address_sources: self.access_sources,
            node_values: self.node_facts,
            location_values: self.location_facts,
            register_values: self.register_facts,
            sweeps,
            location_sweeps,
            history,
        })
    }

    fn fact_count(&self) -> usize {
        self.node_facts.values().map(|facts| facts.len()).sum::<usize>()
            + self.location_facts.values().map(|facts| facts.len()).sum::<usize>()
            + self.register_facts.values().map(|facts| facts.len()).sum::<usize>()
            + self.accessed.values().map(|locations| locations.len()).sum::<usize>()
    }

    fn seed(&mut self) -> Result<(), Error> {
        let design = self.design;

        for memory in design.memories() {
            for allocation in memory.allocations() {
                let root = memory.root(allocation.id())?;
                self.seed_location(&root, allocation.initial_value());
            }
        }

        for register in design.registers() {
            let mut facts = BTreeSet::new();
            facts.insert(register.initial_value().clone());
            for pointer in pointers(register.initial_value()) {
                self.add_sources(
                    Holder::Register(register.id()),
                    &pointer,
                    source(AddressSource::RegisterInitialValue(register.id())),
                );
                facts.insert(pointer);
            }
            self.register_facts.insert(register.id(), facts);
        }

        for node in design.graph().nodes() {
            if let Operation::DeferredAddress(constant) = node.operation() {
                let pointer = LogicalValue::pointer(
                    constant.target().clone(),
                    constant.bits(),
                    constant.policy(),
                );
                self.add_sources(
                    Holder::Node(node.index()),
                    &pointer,
                    source(AddressSource::Node(node.index())),
                );
                self.node_facts
                    .entry(node.index())
                    .or_default()
                    .insert(pointer);
            }
        }

        debug!(
            "seeded {} locations, {} registers, {} address sources",
            self.location_facts.len(),
            self.register_facts.len(),
            self.sources.len()
        );
        Ok(())
    }

    // Push a value to a location, and each record component to the location
    // it occupies.
    fn seed_location(&mut self, location: &Location, value: &LogicalValue) {
        self.location_facts
            .entry(location.clone())
            .or_default()
            .insert(value.clone());

        match value {
            LogicalValue::Pointer { .. } => self.add_sources(
                Holder::Location(location.clone()),
                value,
                source(AddressSource::InitialValue(location.clone())),
            ),
            LogicalValue::Record(_) => {
                for (offset, component) in value.components() {
                    let sub = location.create_offset(component.size(), offset as i64);
                    self.seed_location(&sub, component);
                }
            }
            LogicalValue::Scalar(_) | LogicalValue::Slice { .. } => {}
        }
    }

    fn add_sources(&mut self, holder: Holder, value: &LogicalValue, sources: BTreeSet<AddressSource>) {
        let entry = self.sources.entry((holder, value.clone())).or_default();
        let before = entry.len();
        entry.extend(sources);
        if entry.len() != before {
            self.modified = true;
        }
    }

    fn sources_of(&self, holder: &Holder, value: &LogicalValue) -> Result<BTreeSet<AddressSource>, Error> {
        match self.sources.get(&(holder.clone(), value.clone())) {
            Some(sources) if !sources.is_empty() => Ok(sources.clone()),
            _ => Err(Error::MissingAddressSource(value.to_string())),
        }
    }

    // Move the sources of every pointer in `facts` from one holder to
    // another, along with the facts themselves.
    fn carry(&mut self, from: &Holder, to: &Holder, facts: &BTreeSet<LogicalValue>) -> Result<(), Error> {
        for value in facts.iter().filter(|value| value.is_pointer()) {
            let sources = self.sources_of(from, value)?;
            self.add_sources(to.clone(), value, sources);
        }
        Ok(())
    }

    fn facts(&self, node: usize) -> BTreeSet<LogicalValue> {
        self.node_facts.get(&node).cloned().unwrap_or_default()
    }

    fn pointer_facts(&self, node: usize) -> Vec<PointerFact> {
        self.node_facts
            .get(&node)
            .map(|facts| {
                facts
                    .iter()
                    .filter_map(|value| match value {
                        LogicalValue::Pointer {
                            target,
                            bits,
                            policy,
                        } if !target.is_invalid() => Some(PointerFact {
                            value: value.clone(),
                            target: target.clone(),
                            bits: *bits,
                            policy: *policy,
                        }),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn add_node_facts(&mut self, node: usize, facts: BTreeSet<LogicalValue>) {
        let entry = self.node_facts.entry(node).or_default();
        let before = entry.len();
        entry.extend(facts);
        if entry.len() != before {
            trace!("n{}: {} -> {} facts", node, before, entry.len());
            self.modified = true;
        }
    }

    fn add_location_facts(&mut self, location: &Location, facts: &BTreeSet<LogicalValue>) {
        if facts.is_empty() {
            return;
        }
        let entry = self.location_facts.entry(location.clone()).or_default();
        let before = entry.len();
        entry.extend(facts.iter().cloned());
        if entry.len() != before {
            trace!("{}: {} -> {} facts", location, before, entry.len());
            self.modified = true;
        }
    }

    fn add_register_facts(&mut self, register: RegisterId, facts: BTreeSet<LogicalValue>) {
        let entry = self.register_facts.entry(register).or_default();
        let before = entry.len();
        entry.extend(facts);
        if entry.len() != before {
            trace!("{}: {} -> {} facts", register, before, entry.len());
            self.modified = true;
        }
    }

    fn add_accessed(&mut self, node: usize, locations: BTreeSet<Location>) {
        let entry = self.accessed.entry(node).or_default();
        let before = entry.len();
        entry.extend(locations);
        if entry.len() != before {
            trace!("n{}: accesses {} locations", node, entry.len());
            self.modified = true;
        }
    }

    fn add_access_sources(&mut self, node: usize, sources: BTreeSet<AddressSource>) {
        let entry = self.access_sources.entry(node).or_default();
        let before = entry.len();
        entry.extend(sources);
        if entry.len() != before {
            self.modified = true;
        }
    }

    // Record that `node` produced `location`.
    fn define_location_source(&mut self, location: &Location, node: usize) {
        if !self.created_by.contains_key(location) {
            trace!("n{} created {}", node, location);
            self.created = true;
        }
        if self
            .created_by
            .entry(location.clone())
            .or_default()
            .insert(node)
        {
            self.modified = true;
        }
    }

    // Returns true if `node` may have created `location` or any location it
    // is derived from. This can claim feedback where there is none, but never
    // misses any.
    fn is_feedback(&self, node: usize, location: &Location) -> bool {
        location.chain().any(|location| {
            self.created_by
                .get(location)
                .map(|creators| creators.contains(&node))
                .unwrap_or(false)
        })
    }

    fn visit(&mut self, index: usize) -> Result<(), Error> {
        let design = self.design;
        let node = design.graph().node(index)?;

        match node.operation() {
            // Seeded once, before the first sweep.
            Operation::Constant(_) | Operation::DeferredAddress(_) => Ok(()),
            Operation::Cast
            | Operation::SignExtend
            | Operation::ZeroExtend
            | Operation::NoOp
            | Operation::Latch
            | Operation::Mux => {
                for input in node.inputs() {
                    let facts = self.facts(*input);
                    self.carry(&Holder::Node(*input), &Holder::Node(index), &facts)?;
                    self.add_node_facts(index, facts);
                }
                Ok(())
            }
            Operation::Add => self.visit_arithmetic(index, false),
            Operation::Subtract => self.visit_arithmetic(index, true),
            Operation::Binary(operator) => {
                let inputs = node.inputs();
                if operator.left_operand_only() {
                    self.visit_default(index, &inputs[..inputs.len().min(1)])
                } else {
                    self.visit_default(index, inputs)
                }
            }
            Operation::Unary(_) => self.visit_default(index, node.inputs()),
            Operation::Compare => Ok(()),
            Operation::Read(access) => self.visit_access(index, access, false),
            Operation::Write(access) => self.visit_access(index, access, true),
            Operation::RegisterRead(register) => {
                let facts = self
                    .register_facts
                    .get(register)
                    .cloned()
                    .unwrap_or_default();
                self.carry(&Holder::Register(*register), &Holder::Node(index), &facts)?;
                self.add_node_facts(index, facts);
                Ok(())
            }
            Operation::RegisterWrite(register) => {
                let value = design.graph().input(index, 0)?;
                let facts = self.facts(value);
                self.carry(&Holder::Node(value), &Holder::Register(*register), &facts)?;
                self.add_register_facts(*register, facts);
                Ok(())
            }
        }
    }

    // Pointer plus or minus an integer.
    fn visit_arithmetic(&mut self, index: usize, subtract: bool) -> Result<(), Error> {
        let design = self.design;
        let lhs = design.graph().input(index, 0)?;
        let rhs = design.graph().input(index, 1)?;

        let lhs_pointers = self.pointer_facts(lhs);
        let rhs_pointers = self.pointer_facts(rhs);

        // Subtracting a pointer from a constant leaves nothing constant about
        // the result.
        let (pointers, from, operand) = match (lhs_pointers.is_empty(), rhs_pointers.is_empty()) {
            (false, true) => (lhs_pointers, lhs, Some(rhs)),
            (true, false) if subtract => (rhs_pointers, rhs, None),
            (true, false) => (rhs_pointers, rhs, Some(lhs)),
            _ => return Ok(()),
        };

        let constant = match operand {
            Some(operand) => match design.graph().operation(operand)? {
                Operation::Constant(constant) => Some(constant.value_i64()),
                _ => None,
            },
            None => None,
        };

        let mut outputs = BTreeSet::new();
        for fact in pointers {
            let target = match constant {
                Some(delta) if !self.is_feedback(index, &fact.target) => {
                    let delta = if subtract { delta.wrapping_neg() } else { delta };
                    fact.target.create_offset(0, delta)
                }
                _ => fact.target.create_index(0),
            };
            let pointer = fact.pointer_to(target.clone());
            let sources = self.sources_of(&Holder::Node(from), &fact.value)?;
            self.add_sources(Holder::Node(index), &pointer, sources);
            self.define_location_source(&target, index);
            outputs.insert(pointer);
        }
        self.add_node_facts(index, outputs);
        Ok(())
    }

    // Operators which scramble a pointer. The result may point anywhere in
    // the pointer's allocation.
    fn visit_default(&mut self, index: usize, inputs: &[usize]) -> Result<(), Error> {
        let mut outputs = BTreeSet::new();
        for input in inputs {
            for fact in self.pointer_facts(*input) {
                let pointer = fact.pointer_to(fact.target.absolute_base().clone());
                let sources = self.sources_of(&Holder::Node(*input), &fact.value)?;
                self.add_sources(Holder::Node(index), &pointer, sources);
                outputs.insert(pointer);
            }
        }
        self.add_node_facts(index, outputs);
        Ok(())
    }

    fn visit_access(
        &mut self,
        index: usize,
        access: &MemoryAccess,
        is_write: bool,
    ) -> Result<(), Error> {
        let design = self.design;
        let base = design.graph().input(index, 0)?;

        let mut sources = BTreeSet::new();
        let mut locations = BTreeSet::new();
        for fact in self.pointer_facts(base) {
            sources.extend(self.sources_of(&Holder::Node(base), &fact.value)?);
            let location = match access.addressing() {
                Addressing::Offset(delta) => fact.target.create_offset(access.units(), delta),
                Addressing::Indexed => fact.target.create_index(access.units()),
            };
            self.define_location_source(&location, index);
            locations.insert(location);
        }
        self.add_access_sources(index, sources);
        self.add_accessed(index, locations);

        let accessed = self.accessed.get(&index).cloned().unwrap_or_default();
        if is_write {
            let value = design.graph().input(index, 1)?;
            let facts = self.facts(value);
            for location in &accessed {
                self.carry(&Holder::Node(value), &Holder::Location(location.clone()), &facts)?;
                self.add_location_facts(location, &facts);
            }
        } else {
            let reached: Vec<(Location, BTreeSet<LogicalValue>)> = self
                .location_facts
                .iter()
                .filter(|(location, _)| accessed.iter().any(|accessed| accessed.overlaps(location)))
                .map(|(location, values)| (location.clone(), values.clone()))
                .collect();
            for (location, facts) in reached {
                self.carry(&Holder::Location(location), &Holder::Node(index), &facts)?;
                self.add_node_facts(index, facts);
            }
        }
        Ok(())
    }
}

fn source(source: AddressSource) -> BTreeSet<AddressSource> {
    let mut sources = BTreeSet::new();
    sources.insert(source);
    sources
}

// Every pointer held in a value.
fn pointers(value: &LogicalValue) -> Vec<LogicalValue> {
    match value {
        LogicalValue::Pointer { .. } => vec![value.clone()],
        LogicalValue::Record(values) => values.iter().flat_map(pointers).collect(),
        LogicalValue::Scalar(_) | LogicalValue::Slice { .. } => Vec::new(),
    }
}

/// Run points-to resolution over `design` without registering any access.
pub fn analyze(design: &Design) -> Result<PointsTo, Error> {
    Resolver::new(design).run()
}

/// Run points-to resolution over `design`, then register every resolved
/// access against its memory port.
///
/// Registration replaces the whole access table of every memory in the
/// design. An access is only registered with the locations which belong to
/// the memory it is bound to, and accesses which resolve to no location are
/// left unregistered.
pub fn resolve(design: &mut Design) -> Result<PointsTo, Error> {
    let points_to = analyze(design)?;
    commit(design, &points_to)?;
    Ok(points_to)
}

fn commit(design: &mut Design, points_to: &PointsTo) -> Result<(), Error> {
    let mut tables: BTreeMap<MemoryId, BTreeMap<usize, AccessRegistration>> = design
        .memory_ids()
        .into_iter()
        .map(|memory| (memory, BTreeMap::new()))
        .collect();

    for (node, locations) in &points_to.accessed {
        let access = design.access(*node)?;
        let owned: BTreeSet<Location> = locations
            .iter()
            .filter(|location| location.memory() == Some(access.memory()))
            .cloned()
            .collect();
        if owned.len() != locations.len() {
            debug!(
                "n{}: dropped {} locations outside of {}",
                node,
                locations.len() - owned.len(),
                access.memory()
            );
        }
        if owned.is_empty() {
            continue;
        }
        let is_write = design.graph().operation(*node)?.is_write();
        tables
            .entry(access.memory())
            .or_default()
            .insert(*node, AccessRegistration::new(access.port(), owned, is_write));
    }

    // Check everything before touching anything.
    for (memory, table) in &tables {
        let memory = design.memory(*memory)?;
        for registration in table.values() {
            memory.port(registration.port())?;
        }
    }

    let mut registered = 0;
    for (memory, table) in tables {
        registered += table.len();
        design.memory_mut(memory)?.replace_accesses(table)?;
    }
    info!(
        "points-to resolution registered {} accesses after {} sweeps",
        registered, points_to.sweeps
    );
    Ok(())
}
