//! Removal of memory no access can touch.

use super::base_location_map::build_maps;
use crate::analysis::points_to;
use crate::il::Design;
use crate::memory::{AccessRegistration, Location, LogicalValue};
use crate::types::{AllocationId, MemoryId};
use crate::Error;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// Shrink allocations to the units their accesses may touch.
///
/// An allocation no access touches is deleted. If its address is still held
/// by a deferred constant or a stored pointer, it is replaced by an empty
/// allocation instead, so the address stays valid. An untouched allocation
/// with an address into its interior is kept whole. An allocation whose
/// accesses all stop short of its end loses the untouched tail, unless an
/// address into it points past the kept units or the tail cuts through a
/// pointer. Addresses and registrations of changed allocations move to their
/// replacements.
///
/// Returns the number of allocations deleted, emptied or shortened.
pub fn memory_trimmer(design: &mut Design) -> Result<usize, Error> {
    info!("trimming unused memory");
    points_to::resolve(design)?;

    let mut deferred: Vec<(usize, Location)> = Vec::new();
    for memory in design.memories() {
        for node in memory.deferred_constants() {
            deferred.push((*node, design.deferred_constant(*node)?.target().clone()));
        }
    }
    let addresses: Vec<Location> = deferred
        .iter()
        .map(|(_, target)| target.clone())
        .chain(design.initial_pointer_targets())
        .collect();
    let pinned: BTreeSet<(MemoryId, AllocationId)> = addresses
        .iter()
        .filter_map(|address| address.root_key())
        .collect();

    let mut correlation: BTreeMap<(MemoryId, AllocationId), Location> = BTreeMap::new();
    let mut changed = 0;

    for id in design.memory_ids() {
        for (allocation, map) in build_maps(design.memory(id)?)? {
            let key = (id, allocation);
            let (initial_value, name) = {
                let allocation = design.memory(id)?.allocation(allocation)?;
                (
                    allocation.initial_value().clone(),
                    allocation.name().map(|name| name.to_string()),
                )
            };

            if map.is_empty() {
                if initial_value.size() == 0 {
                    continue;
                }
                let interior = addresses.iter().any(|address| {
                    address.root_key() == Some(key)
                        && (address.abs_min_delta() != 0 || address.abs_max_delta() != 0)
                });
                if interior {
                    debug!("{}: not emptied, an address points inside it", map.root());
                    continue;
                }
                if pinned.contains(&key) {
                    let empty = LogicalValue::zero(0, initial_value.stride_policy()?);
                    let root = design.allocate(id, empty, name.as_deref())?;
                    debug!("{}: emptied, replaced by {}", map.root(), root);
                    correlation.insert(key, root);
                } else {
                    debug!("{}: deleted", map.root());
                }
                design.memory_mut(id)?.delete(allocation)?;
                changed += 1;
                continue;
            }

            let kept = map.end();
            let escapes = addresses.iter().any(|address| {
                address.root_key() == Some(key)
                    && (address.abs_min_delta() < 0 || address.abs_max_delta() > kept)
            });
            if escapes {
                debug!("{}: not trimmed, an address points past unit {}", map.root(), kept);
                continue;
            }

            let trimmed = match map.trimmed_value(&initial_value) {
                Ok(Some(trimmed)) => trimmed,
                Ok(None) => continue,
                Err(error) if error.is_recoverable() => {
                    debug!("{}: not trimmed, {}", map.root(), error);
                    continue;
                }
                Err(error) => return Err(error),
            };
            let root = design.allocate(id, trimmed, name.as_deref())?;
            debug!(
                "{}: {} units trimmed, replaced by {}",
                map.root(),
                map.trimmable_units(),
                root
            );
            design.memory_mut(id)?.delete(allocation)?;
            correlation.insert(key, root);
            changed += 1;
        }
    }

    if correlation.is_empty() {
        info!("trimmed {} allocations", changed);
        return Ok(changed);
    }

    for (node, target) in deferred {
        if let Some(target) = target.correlate(&correlation) {
            design.retarget_deferred_constant(node, target)?;
        }
    }
    design.map_initial_pointers(|target| {
        target
            .correlate(&correlation)
            .unwrap_or_else(|| target.clone())
    })?;

    for id in design.memory_ids() {
        let memory = design.memory(id)?;
        let accesses: BTreeMap<usize, AccessRegistration> = memory
            .accesses()
            .iter()
            .map(|(node, registration)| {
                let locations = registration
                    .locations()
                    .iter()
                    .map(|location| {
                        location
                            .correlate(&correlation)
                            .unwrap_or_else(|| location.clone())
                    })
                    .collect();
                (
                    *node,
                    AccessRegistration::new(registration.port(), locations, registration.is_write()),
                )
            })
            .collect();
        design.memory_mut(id)?.replace_accesses(accesses)?;
    }

    info!("trimmed {} allocations", changed);
    Ok(changed)
}
