//! Spreading reads of single port memories across a second port.

use crate::analysis::points_to;
use crate::il::Design;
use crate::memory::PortAccess;
use crate::Error;
use log::{debug, info};

/// Give every memory with a single port and at least two reads a second read
/// port, and move every other read to it.
///
/// Reads alternate between the two ports in node order, starting with the
/// existing port. Writes stay where they are. Returns the number of memories
/// given a second port.
pub fn dual_port(design: &mut Design) -> Result<usize, Error> {
    if !design.options().allow_dual_port() {
        debug!("dual porting is disabled");
        return Ok(0);
    }
    info!("dual porting memories");
    points_to::resolve(design)?;

    let mut dual_ported = 0;
    for id in design.memory_ids() {
        let memory = design.memory(id)?;
        let first = match memory.ports().collect::<Vec<_>>().as_slice() {
            [port] => port.id(),
            _ => continue,
        };
        let reads = memory.reads();
        if reads.len() < 2 {
            continue;
        }

        let second = design.memory_mut(id)?.create_port(PortAccess::READ);
        for (i, node) in reads.into_iter().enumerate() {
            let port = if i % 2 == 0 { first } else { second };
            design.memory_mut(id)?.move_access(node, port)?;
            design.rebind_access(node, id, port)?;
        }
        debug!("{}: reads split across {} and {}", id, first, second);
        dual_ported += 1;
    }

    info!("dual ported {} memories", dual_ported);
    Ok(dual_ported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::Addressing;
    use crate::memory::{AddressStridePolicy, LogicalValue};
    use crate::options::{Options, OptionsBuilder};
    use crate::types::PortId;

    const BYTES: AddressStridePolicy = AddressStridePolicy::BYTE_ADDRESSING;

    fn design_with_reads(options: Options, reads: usize) -> (Design, Vec<usize>, usize) {
        let mut design = Design::new(options);
        let memory = design.create_memory(32);
        let root = design
            .allocate(memory, LogicalValue::zero(16, BYTES), None)
            .unwrap();
        let port = design
            .memory_mut(memory)
            .unwrap()
            .create_port(PortAccess::READ_WRITE);
        let base = design.add_deferred_constant(root, 32).unwrap();
        let nodes = (0..reads)
            .map(|i| {
                design
                    .add_read(memory, port, base, Addressing::Offset(i as i64 * 4), 4)
                    .unwrap()
            })
            .collect();
        let value = design.add_constant(0, 32).unwrap();
        let write = design
            .add_write(memory, port, base, value, Addressing::Offset(12), 4)
            .unwrap();
        (design, nodes, write)
    }

    #[test]
    fn reads_alternate_between_ports() {
        let (mut design, reads, write) = design_with_reads(Options::default(), 3);

        assert_eq!(dual_port(&mut design).unwrap(), 1);

        let memory = design.memories().next().unwrap();
        assert_eq!(memory.ports().count(), 2);
        let first = PortId::new(0);
        let second = PortId::new(1);
        assert_eq!(memory.port_accesses(first), vec![reads[0], reads[2], write]);
        assert_eq!(memory.port_accesses(second), vec![reads[1]]);
        assert_eq!(memory.port_usage(second), PortAccess::READ);
        assert_eq!(design.access(reads[1]).unwrap().port(), second);
        assert_eq!(design.access(write).unwrap().port(), first);

        // a second run finds two ports and leaves the memory alone
        assert_eq!(dual_port(&mut design).unwrap(), 0);
        let memory = design.memories().next().unwrap();
        assert_eq!(memory.port_accesses(second), vec![reads[1]]);
    }

    #[test]
    fn single_reads_keep_one_port() {
        let (mut design, _, _) = design_with_reads(Options::default(), 1);
        assert_eq!(dual_port(&mut design).unwrap(), 0);
        assert_eq!(design.memories().next().unwrap().ports().count(), 1);
    }

    #[test]
    fn disabled_by_options() {
        let options = OptionsBuilder::new().allow_dual_port(false).build();
        let (mut design, _, _) = design_with_reads(options, 4);
        assert_eq!(dual_port(&mut design).unwrap(), 0);
        assert_eq!(design.memories().next().unwrap().ports().count(), 1);
    }
}
