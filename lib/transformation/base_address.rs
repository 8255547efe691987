//! Base address uniquification.
//!
//! When the base address of an access can only ever point at one fixed
//! location, the expression computing it is replaced by a single deferred
//! constant. The address then no longer depends on the layout of anything but
//! the target's memory.

use crate::analysis::points_to;
use crate::il::Design;
use crate::memory::LogicalValue;
use crate::Error;
use log::{debug, info};

/// Rewire the base address input of every access whose base can only hold
/// one statically known pointer to a new deferred constant. Returns the
/// number of base addresses replaced.
pub fn base_address(design: &mut Design) -> Result<usize, Error> {
    info!("uniquifying memory base addresses");
    let points_to = points_to::resolve(design)?;

    let mut replacements = Vec::new();
    for node in design.access_nodes() {
        let base = design.graph().input(node, 0)?;
        if design.graph().operation(base)?.is_constant() {
            continue;
        }

        let values = match points_to.node_values(base) {
            Some(values) if values.len() == 1 => values,
            _ => continue,
        };
        let (target, bits) = match values.iter().next() {
            Some(LogicalValue::Pointer { target, bits, .. }) if !target.is_invalid() => {
                (target.clone(), *bits)
            }
            _ => continue,
        };

        let memory = match target.memory() {
            Some(memory) => design.memory(memory)?,
            None => continue,
        };
        // Index targets have no fixed address.
        if let Err(error) = memory.initial_value(&target) {
            if error.is_recoverable() {
                debug!("n{}: base not uniquified, {}", node, error);
                continue;
            }
            return Err(error);
        }
        replacements.push((node, target, bits));
    }

    let replaced = replacements.len();
    for (node, target, bits) in replacements {
        let constant = design.add_deferred_constant(target, bits)?;
        design.graph_mut().set_input(node, 0, constant)?;
        debug!("n{}: base address is now n{}", node, constant);
    }

    info!("uniquified {} memory base addresses", replaced);
    Ok(replaced)
}
