//! Conversion of single element memories to registers.

use crate::analysis::points_to;
use crate::il::Design;
use crate::memory::Location;
use crate::Error;
use log::{debug, info};
use std::collections::BTreeSet;

/// Replace every access of a small memory with an access of a register, when
/// all of the memory's accesses touch the same single fixed location.
///
/// The memory and its allocations are kept, so the address of the converted
/// location may still be taken. Returns the number of memories converted.
pub fn memory_to_register(design: &mut Design) -> Result<usize, Error> {
    info!("converting single element memories to registers");
    points_to::resolve(design)?;

    let limit = design.options().register_conversion_limit();
    let mut converted = 0;

    for id in design.memory_ids() {
        let memory = design.memory(id)?;
        if memory.size_in_bytes()? > limit {
            continue;
        }
        // An unresolved access may touch any location.
        if let Some(node) = design.unresolved_accesses(id)?.first() {
            debug!("{}: not converted, n{} is unresolved", id, node);
            continue;
        }

        let locations: BTreeSet<&Location> = memory
            .accesses()
            .values()
            .flat_map(|registration| registration.locations())
            .collect();
        if locations.len() != 1 {
            continue;
        }
        let location = match locations.into_iter().next() {
            Some(location) => location.clone(),
            None => continue,
        };

        // Index locations have no single initial value.
        let initial_value = match memory.initial_value(&location) {
            Ok(initial_value) => initial_value,
            Err(error) if error.is_recoverable() => {
                debug!("{}: not converted, {}", id, error);
                continue;
            }
            Err(error) => return Err(error),
        };
        let name = match location.allocation() {
            Some(allocation) => memory.allocation(allocation)?.name().map(|name| name.to_string()),
            None => None,
        };
        let nodes: Vec<usize> = memory.accesses().keys().cloned().collect();

        let register = design.create_register(initial_value, name.as_deref());
        for node in nodes {
            design.replace_with_register_access(node, register)?;
        }
        debug!("{}: {} converted to {}", id, location, register);
        converted += 1;
    }

    info!(
        "converted {} {}",
        converted,
        if converted == 1 {
            "memory to a register"
        } else {
            "memories to registers"
        }
    );
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{Addressing, Operation};
    use crate::memory::{AddressStridePolicy, LogicalValue, PortAccess};
    use crate::options::{Options, OptionsBuilder};
    use crate::types::Endian;

    const BYTES: AddressStridePolicy = AddressStridePolicy::BYTE_ADDRESSING;

    #[test]
    fn single_location_memory_becomes_a_register() {
        let mut design = Design::new(Options::default());
        let memory = design.create_memory(32);
        let root = design
            .allocate(
                memory,
                LogicalValue::scalar(0x1122_3344, 32, BYTES, Endian::Little),
                Some("counter"),
            )
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ_WRITE);
        let base = design.add_deferred_constant(root.clone(), 32).unwrap();
        let read = design
            .add_read(memory, port, base, Addressing::Offset(0), 4)
            .unwrap();
        let write = design
            .add_write(memory, port, base, read, Addressing::Offset(0), 4)
            .unwrap();

        assert_eq!(memory_to_register(&mut design).unwrap(), 1);

        let register = design.registers().next().unwrap();
        assert_eq!(register.name(), Some("counter"));
        assert_eq!(register.bits(), 32);
        assert_eq!(
            design.graph().operation(read).unwrap(),
            &Operation::RegisterRead(register.id())
        );
        assert_eq!(
            design.graph().operation(write).unwrap(),
            &Operation::RegisterWrite(register.id())
        );
        assert_eq!(design.graph().node(write).unwrap().inputs(), &[read]);
        assert!(design.memory(memory).unwrap().accesses().is_empty());
        // the allocation is still there to take the address of
        assert!(design.memory(memory).unwrap().root(root.allocation().unwrap()).is_ok());
    }

    #[test]
    fn indexed_memories_are_kept() {
        let mut design = Design::new(Options::default());
        let memory = design.create_memory(32);
        let root = design
            .allocate(memory, LogicalValue::zero(8, BYTES), None)
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ);
        let base = design.add_deferred_constant(root, 32).unwrap();
        design
            .add_read(memory, port, base, Addressing::Indexed, 4)
            .unwrap();

        assert_eq!(memory_to_register(&mut design).unwrap(), 0);
        assert_eq!(design.registers().count(), 0);
    }

    #[test]
    fn large_memories_are_kept() {
        let mut design = Design::new(OptionsBuilder::new().register_conversion_limit(2).build());
        let memory = design.create_memory(32);
        let root = design
            .allocate(memory, LogicalValue::zero(4, BYTES), None)
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ);
        let base = design.add_deferred_constant(root, 32).unwrap();
        design
            .add_read(memory, port, base, Addressing::Offset(0), 4)
            .unwrap();

        assert_eq!(memory_to_register(&mut design).unwrap(), 0);
    }

    #[test]
    fn memories_with_unresolved_accesses_are_kept() {
        let mut design = Design::new(Options::default());
        let memory = design.create_memory(32);
        let root = design
            .allocate(memory, LogicalValue::zero(4, BYTES), None)
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ_WRITE);
        let base = design.add_deferred_constant(root, 32).unwrap();
        let read = design
            .add_read(memory, port, base, Addressing::Offset(0), 4)
            .unwrap();
        let address = design.add_constant(0, 32).unwrap();
        let write = design
            .add_write(memory, port, address, read, Addressing::Offset(0), 4)
            .unwrap();

        assert_eq!(memory_to_register(&mut design).unwrap(), 0);
        assert_eq!(design.registers().count(), 0);
        assert!(design.graph().operation(read).unwrap().access().is_some());
        assert!(design.graph().operation(write).unwrap().access().is_some());
        assert_eq!(design.unresolved_accesses(memory).unwrap(), vec![write]);
    }

    #[test]
    fn memories_with_two_locations_are_kept() {
        let mut design = Design::new(Options::default());
        let memory = design.create_memory(32);
        let root = design
            .allocate(memory, LogicalValue::zero(8, BYTES), None)
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ);
        let base = design.add_deferred_constant(root, 32).unwrap();
        design
            .add_read(memory, port, base, Addressing::Offset(0), 4)
            .unwrap();
        design
            .add_read(memory, port, base, Addressing::Offset(4), 4)
            .unwrap();

        assert_eq!(memory_to_register(&mut design).unwrap(), 0);
    }
}
