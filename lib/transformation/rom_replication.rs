//! Replication of read-only memories.
//!
//! A read-only memory with many reads is a bottleneck, since every read
//! competes for the same ports. Replicating it gives each copy its own
//! ports, at the cost of storing the contents once per copy. Copies are made
//! until either every port carries a single access, or the total size of all
//! copies reaches `Options::rom_replication_limit`.

use crate::analysis::{points_to, AddressSource, PointsTo};
use crate::il::Design;
use crate::memory::{AccessRegistration, Location, LogicalMemory, PortAccess};
use crate::types::{AllocationId, MemoryId};
use crate::Error;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

struct Candidate {
    memory: MemoryId,
    bytes: usize,
    accesses: Vec<usize>,
}

impl Candidate {
    fn copies(&self, accesses_per_port: usize, ports_per_copy: usize) -> usize {
        let per_copy = accesses_per_port * ports_per_copy;
        (self.accesses.len() + per_copy - 1) / per_copy
    }
}

/// Replicate read-only memories so that each port of each copy carries as
/// few accesses as the size limit allows. Returns the number of memories
/// replicated.
pub fn rom_replication(design: &mut Design) -> Result<usize, Error> {
    let limit = design.options().rom_replication_limit() * 1024;
    if limit == 0 {
        debug!("rom replication is disabled");
        return Ok(0);
    }
    info!("replicating read-only memories");
    let points_to = points_to::resolve(design)?;

    let ports_per_copy = if design.options().force_single_port_roms() {
        1
    } else {
        2
    };

    let pointed_to: BTreeSet<MemoryId> = design
        .initial_pointer_targets()
        .iter()
        .filter_map(|target| target.memory())
        .collect();

    let mut candidates = Vec::new();
    for memory in design.memories() {
        if memory.accesses().is_empty() || !memory.is_read_only() {
            continue;
        }
        if pointed_to.contains(&memory.id()) {
            debug!("{}: not replicated, its address is stored in memory", memory.id());
            continue;
        }
        if !is_replicable(design, memory, &points_to)? {
            continue;
        }
        candidates.push(Candidate {
            memory: memory.id(),
            bytes: memory.size_in_bytes()?,
            accesses: memory.accesses().keys().cloned().collect(),
        });
    }

    let mut accesses_per_port = 1;
    loop {
        let total: usize = candidates
            .iter()
            .map(|candidate| candidate.bytes * candidate.copies(accesses_per_port, ports_per_copy))
            .sum();
        let most = candidates
            .iter()
            .map(|candidate| candidate.copies(accesses_per_port, ports_per_copy))
            .max()
            .unwrap_or(1);
        if total <= limit || most <= 1 {
            debug!(
                "{} accesses per port, {} bytes replicated",
                accesses_per_port, total
            );
            break;
        }
        accesses_per_port += 1;
    }

    let mut replicated = 0;
    for candidate in candidates {
        let copies = candidate.copies(accesses_per_port, ports_per_copy);
        if copies <= 1 {
            continue;
        }
        replicate(
            design,
            &points_to,
            &candidate,
            accesses_per_port,
            ports_per_copy,
        )?;
        debug!("{}: replicated {} times", candidate.memory, copies);
        replicated += 1;
    }

    info!("replicated {} read-only memories", replicated);
    Ok(replicated)
}

// Every access of `memory` must be registered, and reach it only through
// deferred constants of its own which no other access shares. Every deferred
// constant targeting `memory` must be such a source.
fn is_replicable(design: &Design, memory: &LogicalMemory, points_to: &PointsTo) -> Result<bool, Error> {
    let id = memory.id();
    if let Some(node) = design.unresolved_accesses(id)?.first() {
        debug!("{}: not replicated, n{} is unresolved", id, node);
        return Ok(false);
    }

    let mut seen = BTreeSet::new();
    for node in memory.accesses().keys() {
        let sources = match points_to.address_sources(*node) {
            Some(sources) => sources,
            None => return Ok(false),
        };
        for source in sources {
            let constant = match source {
                AddressSource::Node(constant) => *constant,
                _ => {
                    debug!("{}: not replicated, n{} has source {:?}", id, node, source);
                    return Ok(false);
                }
            };
            if design.deferred_constant(constant)?.target().memory() != Some(id) {
                return Ok(false);
            }
            if !seen.insert(constant) {
                debug!("{}: not replicated, n{} is a shared source", id, constant);
                return Ok(false);
            }
        }
    }

    if memory
        .deferred_constants()
        .iter()
        .any(|constant| !seen.contains(constant))
    {
        debug!("{}: not replicated, its address is taken outside of accesses", id);
        return Ok(false);
    }
    Ok(true)
}

fn replicate(
    design: &mut Design,
    points_to: &PointsTo,
    candidate: &Candidate,
    accesses_per_port: usize,
    ports_per_copy: usize,
) -> Result<(), Error> {
    let original = design.memory(candidate.memory)?.clone();

    for chunk in candidate.accesses.chunks(accesses_per_port * ports_per_copy) {
        let copy = design.create_memory(original.address_width());
        let mut correlation: BTreeMap<(MemoryId, AllocationId), Location> = BTreeMap::new();
        for allocation in original.allocations() {
            let root = design.allocate(
                copy,
                allocation.initial_value().clone(),
                allocation.name(),
            )?;
            correlation.insert((original.id(), allocation.id()), root);
        }
        let ports: Vec<_> = (0..ports_per_copy)
            .map(|_| design.memory_mut(copy).map(|memory| memory.create_port(PortAccess::READ)))
            .collect::<Result<_, Error>>()?;

        for (i, node) in chunk.iter().enumerate() {
            let port = ports[i / accesses_per_port];
            let registration = original
                .access(*node)
                .ok_or_else(|| Error::Custom(format!("n{} has no access in {}", node, original.id())))?;
            let locations = registration
                .locations()
                .iter()
                .map(|location| correlate(location, &correlation))
                .collect::<Result<BTreeSet<Location>, Error>>()?;

            design.rebind_access(*node, copy, port)?;
            design
                .memory_mut(copy)?
                .register_access(*node, AccessRegistration::new(port, locations, false))?;

            for source in points_to.address_sources(*node).into_iter().flatten() {
                if let AddressSource::Node(constant) = source {
                    let target = correlate(design.deferred_constant(*constant)?.target(), &correlation)?;
                    design.retarget_deferred_constant(*constant, target)?;
                }
            }
        }
        debug!("{}: copy {} serves {} accesses", original.id(), copy, chunk.len());
    }

    design.remove_memory(original.id())?;
    Ok(())
}

fn correlate(
    location: &Location,
    correlation: &BTreeMap<(MemoryId, AllocationId), Location>,
) -> Result<Location, Error> {
    location
        .correlate(correlation)
        .ok_or_else(|| Error::Custom(format!("{} has no replicated counterpart", location)))
}
