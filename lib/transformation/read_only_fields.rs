//! Folding of reads from locations which are never written.

use crate::analysis::points_to;
use crate::il::Design;
use crate::memory::{Location, MemoryConstant};
use crate::types::Endian;
use crate::Error;
use log::{debug, info, trace};

// What a read folds into.
#[derive(Clone, Debug)]
enum Fold {
    Numeric { value: u64, bits: usize },
    Address { target: Location, bits: usize },
}

/// Replace reads of read-only locations with the constant those locations
/// hold.
///
/// A read is folded when every location it may touch is read-only and every
/// one of those locations holds the same constant. Numeric constants of up
/// to 64 bits become `Constant` nodes, and a single address becomes a
/// deferred constant. Reads of registers which are never written fold to the
/// register's initial value. Returns the number of reads folded.
pub fn read_only_fields(design: &mut Design) -> Result<usize, Error> {
    info!("optimizing read-only memory locations");
    points_to::resolve(design)?;

    let endian = design.options().endian();
    let mut folds = Vec::new();

    for memory in design.memories() {
        // An unresolved write may touch any location.
        let mut unresolved_write = None;
        for node in design.unresolved_accesses(memory.id())? {
            if design.graph().operation(node)?.is_write() {
                unresolved_write = Some(node);
                break;
            }
        }
        if let Some(node) = unresolved_write {
            debug!("{}: not folded, n{} is unresolved", memory.id(), node);
            continue;
        }

        for node in memory.reads() {
            let locations = match memory.access(node) {
                Some(registration) => registration.locations(),
                None => continue,
            };

            let mut common: Option<MemoryConstant> = None;
            let mut foldable = true;
            for location in locations {
                if !memory.is_location_read_only(location) {
                    foldable = false;
                    break;
                }
                let constant = match memory
                    .initial_value(location)
                    .and_then(|value| value.to_constant())
                {
                    Ok(constant) => constant,
                    Err(error) if error.is_recoverable() => {
                        trace!("n{}: {}", node, error);
                        foldable = false;
                        break;
                    }
                    Err(error) => return Err(error),
                };
                if let Some(common) = &common {
                    if !common.same_value(&constant) {
                        foldable = false;
                        break;
                    }
                } else {
                    common = Some(constant);
                }
            }

            let constant = match common {
                Some(constant) if foldable => constant,
                _ => continue,
            };
            match fold(&constant, endian) {
                Some(fold) => folds.push((node, fold)),
                None => debug!("n{}: can not fold {}", node, constant),
            }
        }
    }

    for register in design.registers() {
        if !design.register_writes(register.id()).is_empty() {
            continue;
        }
        let constant = match register.initial_value().to_constant() {
            Ok(constant) => constant,
            Err(error) if error.is_recoverable() => continue,
            Err(error) => return Err(error),
        };
        if let Some(fold) = fold(&constant, endian) {
            for node in design.register_reads(register.id()) {
                folds.push((node, fold.clone()));
            }
        }
    }

    let folded = folds.len();
    for (node, fold) in folds {
        match fold {
            Fold::Numeric { value, bits } => design.replace_with_constant(node, value, bits)?,
            Fold::Address { target, bits } => {
                design.replace_with_deferred_constant(node, target, bits)?
            }
        }
    }

    info!("folded {} read-only accesses", folded);
    Ok(folded)
}

fn fold(constant: &MemoryConstant, endian: Endian) -> Option<Fold> {
    match constant {
        MemoryConstant::Address { target, bits, .. } => Some(Fold::Address {
            target: target.clone(),
            bits: *bits,
        }),
        _ if constant.contains_address() => None,
        _ => {
            let bits = constant.bit_size();
            if bits == 0 || bits > 64 {
                return None;
            }
            constant
                .numeric(endian)
                .map(|value| Fold::Numeric { value, bits })
        }
    }
}
