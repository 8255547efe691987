//! Splitting of memories whose accesses never meet.
//!
//! Accesses of one memory fall into groups, where two accesses share a group
//! if they may touch the same allocation or take their address from the same
//! source. Each group other than the first moves to a memory of its own,
//! taking its allocations, its accesses and the ports those accesses use.

use crate::analysis::{points_to, AddressSource, PointsTo};
use crate::il::Design;
use crate::memory::{AccessRegistration, Location, LogicalMemory};
use crate::types::{AllocationId, MemoryId, PortId};
use crate::Error;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

// Accesses of one memory, with every allocation they touch and every source
// of their addresses.
#[derive(Debug, Default)]
struct Contents {
    accesses: BTreeSet<usize>,
    allocations: BTreeSet<AllocationId>,
    sources: BTreeSet<AddressSource>,
}

impl Contents {
    fn overlaps(&self, allocations: &BTreeSet<AllocationId>, sources: &BTreeSet<AddressSource>) -> bool {
        !self.allocations.is_disjoint(allocations) || !self.sources.is_disjoint(sources)
    }

    fn merge(&mut self, other: Contents) {
        self.accesses.extend(other.accesses);
        self.allocations.extend(other.allocations);
        self.sources.extend(other.sources);
    }
}

/// Split every memory whose accesses fall into more than one group, so that
/// no two memories share an access, an allocation or an address source.
///
/// The group holding the lowest allocation stays behind, together with every
/// allocation no access touches. Deferred constants and stored pointers
/// follow their allocation to its new memory. Memories with an unresolved
/// access are left whole.
///
/// Returns the number of memories created.
pub fn memory_splitter(design: &mut Design) -> Result<usize, Error> {
    info!("splitting memories");
    let points_to = points_to::resolve(design)?;

    let mut plans = Vec::new();
    for memory in design.memories() {
        if let Some(node) = design.unresolved_accesses(memory.id())?.first() {
            debug!("{}: not split, n{} is unresolved", memory.id(), node);
            continue;
        }
        let partition = partition(memory, &points_to);
        if partition.len() > 1 {
            plans.push((memory.id(), partition));
        }
    }

    let split = plans.len();
    let mut created = 0;
    let mut correlation: BTreeMap<(MemoryId, AllocationId), Location> = BTreeMap::new();
    for (id, partition) in plans {
        let original = design.memory(id)?.clone();
        for contents in partition.iter().skip(1) {
            let copy = split_off(design, &original, contents, &mut correlation)?;
            debug!(
                "{}: {} accesses and {} allocations moved to {}",
                id,
                contents.accesses.len(),
                contents.allocations.len(),
                copy
            );
            created += 1;
        }

        // Ports whose every access moved away.
        for port in original.ports() {
            let was_used = !original.port_accesses(port.id()).is_empty();
            if was_used && design.memory(id)?.port_accesses(port.id()).is_empty() {
                design.memory_mut(id)?.remove_port(port.id())?;
            }
        }
    }

    if correlation.is_empty() {
        info!("no memory split");
        return Ok(0);
    }

    let mut retargets = Vec::new();
    for memory in design.memories() {
        for node in memory.deferred_constants() {
            if let Some(target) = design.deferred_constant(*node)?.target().correlate(&correlation) {
                retargets.push((*node, target));
            }
        }
    }
    for (node, target) in retargets {
        design.retarget_deferred_constant(node, target)?;
    }
    design.map_initial_pointers(|target| {
        target
            .correlate(&correlation)
            .unwrap_or_else(|| target.clone())
    })?;

    info!(
        "split {} {} into {}",
        split,
        if split == 1 { "memory" } else { "memories" },
        split + created
    );
    Ok(created)
}

// Group the accesses of `memory`, ordered by their lowest allocation.
fn partition(memory: &LogicalMemory, points_to: &PointsTo) -> Vec<Contents> {
    let mut partition: Vec<Contents> = Vec::new();
    for (node, registration) in memory.accesses() {
        let allocations: BTreeSet<AllocationId> = registration
            .locations()
            .iter()
            .filter_map(|location| location.allocation())
            .collect();
        let sources = points_to.address_sources(*node).cloned().unwrap_or_default();

        let mut contents = Contents::default();
        let mut kept = Vec::with_capacity(partition.len() + 1);
        for existing in partition.drain(..) {
            if existing.overlaps(&allocations, &sources) {
                contents.merge(existing);
            } else {
                kept.push(existing);
            }
        }
        contents.accesses.insert(*node);
        contents.allocations.extend(allocations);
        contents.sources.extend(sources);
        kept.push(contents);
        partition = kept;
    }
    partition.sort_by_key(|contents| contents.allocations.iter().next().cloned());
    partition
}

// Move one group of `original` to a new memory. The correlation from old to
// new roots is added to `correlation`.
fn split_off(
    design: &mut Design,
    original: &LogicalMemory,
    contents: &Contents,
    correlation: &mut BTreeMap<(MemoryId, AllocationId), Location>,
) -> Result<MemoryId, Error> {
    let copy = design.create_memory(original.address_width());
    for id in &contents.allocations {
        let allocation = original.allocation(*id)?;
        let root = design.allocate(copy, allocation.initial_value().clone(), allocation.name())?;
        correlation.insert((original.id(), *id), root);
    }

    let mut ports: BTreeMap<PortId, PortId> = BTreeMap::new();
    for node in &contents.accesses {
        let registration = original
            .access(*node)
            .ok_or_else(|| Error::Custom(format!("n{} has no access in {}", node, original.id())))?;
        let port = match ports.get(&registration.port()) {
            Some(port) => *port,
            None => {
                let access = original.port(registration.port())?.access();
                let port = design.memory_mut(copy)?.create_port(access);
                ports.insert(registration.port(), port);
                port
            }
        };
        let locations = registration
            .locations()
            .iter()
            .map(|location| {
                location
                    .correlate(correlation)
                    .ok_or_else(|| Error::Custom(format!("{} was not moved to {}", location, copy)))
            })
            .collect::<Result<BTreeSet<Location>, Error>>()?;

        design.rebind_access(*node, copy, port)?;
        design.memory_mut(original.id())?.remove_access(*node);
        design.memory_mut(copy)?.register_access(
            *node,
            AccessRegistration::new(port, locations, registration.is_write()),
        )?;
    }

    for id in &contents.allocations {
        design.memory_mut(original.id())?.delete(*id)?;
    }
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{Addressing, Operation};
    use crate::memory::{AddressStridePolicy, LogicalValue, PortAccess};
    use crate::options::Options;
    use crate::types::Endian;

    const BYTES: AddressStridePolicy = AddressStridePolicy::BYTE_ADDRESSING;

    #[test]
    fn disjoint_accesses_get_their_own_memory() {
        let mut design = Design::new(Options::default());
        let memory = design.create_memory(32);
        let a = design
            .allocate(
                memory,
                LogicalValue::scalar(7, 32, BYTES, Endian::Little),
                Some("a"),
            )
            .unwrap();
        let b = design
            .allocate(memory, LogicalValue::zero(8, BYTES), Some("b"))
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ_WRITE);
        let a_base = design.add_deferred_constant(a.clone(), 32).unwrap();
        let b_base = design.add_deferred_constant(b.clone(), 32).unwrap();
        let read = design
            .add_read(memory, port, a_base, Addressing::Offset(0), 4)
            .unwrap();
        let write = design
            .add_write(memory, port, b_base, read, Addressing::Offset(4), 4)
            .unwrap();

        assert_eq!(memory_splitter(&mut design).unwrap(), 1);

        let copy = design.access(write).unwrap().memory();
        assert_ne!(copy, memory);
        assert_eq!(design.access(read).unwrap().memory(), memory);

        let kept = design.memory(memory).unwrap();
        assert_eq!(kept.allocations().count(), 1);
        assert!(kept.allocation(a.allocation().unwrap()).is_ok());
        assert!(kept.access(write).is_none());
        assert!(kept.is_read_only());
        assert_eq!(kept.ports().count(), 1);

        let moved = design.memory(copy).unwrap();
        let allocation = moved.allocations().next().unwrap();
        assert_eq!(allocation.name(), Some("b"));
        assert_eq!(allocation.size(), 8);
        let root = moved.root(allocation.id()).unwrap();
        assert_eq!(design.deferred_constant(b_base).unwrap().target(), &root);
        assert!(moved.deferred_constants().contains(&b_base));
        assert_eq!(
            moved.access(write).unwrap().locations(),
            &vec![root.create_offset(4, 4)].into_iter().collect()
        );
        assert_eq!(
            moved.port(design.access(write).unwrap().port()).unwrap().access(),
            PortAccess::READ_WRITE
        );

        // nothing left to split
        assert_eq!(memory_splitter(&mut design).unwrap(), 0);
    }

    #[test]
    fn accesses_reaching_both_allocations_keep_the_memory_whole() {
        let mut design = Design::new(Options::default());
        let memory = design.create_memory(32);
        let a = design
            .allocate(memory, LogicalValue::zero(4, BYTES), None)
            .unwrap();
        let b = design
            .allocate(memory, LogicalValue::zero(4, BYTES), None)
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ);
        let a_base = design.add_deferred_constant(a, 32).unwrap();
        let b_base = design.add_deferred_constant(b, 32).unwrap();
        let either = design.add_node(Operation::Mux, vec![a_base, b_base]).unwrap();
        design
            .add_read(memory, port, either, Addressing::Offset(0), 4)
            .unwrap();
        design
            .add_read(memory, port, b_base, Addressing::Offset(0), 4)
            .unwrap();

        assert_eq!(memory_splitter(&mut design).unwrap(), 0);
        assert_eq!(design.memory_ids(), vec![memory]);
    }

    #[test]
    fn stored_pointers_follow_their_allocation() {
        let mut design = Design::new(Options::default());
        let memory = design.create_memory(32);
        let data = Location::root(memory, AllocationId::new(1), 8);
        let slot = design
            .allocate(memory, LogicalValue::pointer(data.clone(), 32, BYTES), None)
            .unwrap();
        assert_eq!(
            design
                .allocate(memory, LogicalValue::zero(8, BYTES), Some("data"))
                .unwrap(),
            data
        );
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ);
        let slot_base = design.add_deferred_constant(slot.clone(), 32).unwrap();
        let load = design
            .add_read(memory, port, slot_base, Addressing::Offset(0), 4)
            .unwrap();
        let read = design
            .add_read(memory, port, load, Addressing::Offset(4), 4)
            .unwrap();

        assert_eq!(memory_splitter(&mut design).unwrap(), 1);

        let copy = design.access(read).unwrap().memory();
        assert_ne!(copy, memory);
        let stored = design
            .memory(memory)
            .unwrap()
            .allocation(slot.allocation().unwrap())
            .unwrap()
            .initial_value()
            .pointer_targets()[0]
            .clone();
        assert_eq!(stored.memory(), Some(copy));

        // a fresh resolution agrees with the moved registrations
        points_to::resolve(&mut design).unwrap();
        let moved = design.memory(copy).unwrap();
        assert_eq!(
            moved.access(read).unwrap().locations(),
            &vec![stored.create_offset(4, 4)].into_iter().collect()
        );
        assert_eq!(
            design.memory(memory).unwrap().accesses().keys().collect::<Vec<_>>(),
            vec![&load]
        );
    }

    #[test]
    fn unresolved_accesses_keep_the_memory_whole() {
        let mut design = Design::new(Options::default());
        let memory = design.create_memory(32);
        let a = design
            .allocate(memory, LogicalValue::zero(4, BYTES), None)
            .unwrap();
        let b = design
            .allocate(memory, LogicalValue::zero(4, BYTES), None)
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ);
        let a_base = design.add_deferred_constant(a, 32).unwrap();
        let b_base = design.add_deferred_constant(b, 32).unwrap();
        let unknown = design.add_constant(0, 32).unwrap();
        for base in [a_base, b_base, unknown] {
            design
                .add_read(memory, port, base, Addressing::Offset(0), 4)
                .unwrap();
        }

        assert_eq!(memory_splitter(&mut design).unwrap(), 0);
        assert_eq!(design.memory(memory).unwrap().allocations().count(), 2);
    }
}
