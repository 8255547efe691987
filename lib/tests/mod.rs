use crate::analysis::{points_to, AddressSource};
use crate::il::{Addressing, Design, Operation};
use crate::memory::{AddressStridePolicy, Location, LogicalValue, PortAccess};
use crate::options::Options;
use crate::transformation;
use crate::types::Endian;


const BYTES: AddressStridePolicy = AddressStridePolicy::BYTE_ADDRESSING;

#[test]
fn whole_scalar_read() {
    let mut design = Design::new(Options::default());
    let memory = design.create_memory(32);
    let root = design
        .allocate(
            memory,
            LogicalValue::scalar(0x1122_3344, 32, BYTES, Endian::Little),
            None,
        )
        .unwrap();
    let port = design
        .memory_mut(memory)
        .unwrap()
        .create_port(PortAccess::READ);
    let base = design.add_deferred_constant(root.clone(), 32).unwrap();
    let read = design
        .add_read(memory, port, base, Addressing::Offset(0), 4)
        .unwrap();

    points_to::resolve(&mut design).unwrap();
    let registration = design.memory(memory).unwrap().access(read).unwrap();
    assert_eq!(registration.locations(), &vec![root].into_iter().collect());

    assert_eq!(transformation::memory_to_register(&mut design).unwrap(), 1);
    let register = design.registers().next().unwrap();
    assert_eq!(
        register
            .initial_value()
            .to_constant()
            .unwrap()
            .numeric(Endian::Little),
        Some(0x1122_3344)
    );
}

#[test]
fn disjoint_read_and_write() {
    let mut design = Design::new(Options::default());
    let memory = design.create_memory(32);
    let root = design
        .allocate(memory, LogicalValue::zero(8, BYTES), None)
        .unwrap();
    let port = design
        .memory_mut(memory)
        .unwrap()
        .create_port(PortAccess::READ_WRITE);
    let base = design.add_deferred_constant(root.clone(), 32).unwrap();
    let value = design.add_constant(7, 32).unwrap();
    let read = design
        .add_read(memory, port, base, Addressing::Offset(0), 4)
        .unwrap();
    let write = design
        .add_write(memory, port, base, value, Addressing::Offset(4), 4)
        .unwrap();

    points_to::resolve(&mut design).unwrap();
    let memory = design.memory(memory).unwrap();
    let low = memory.access(read).unwrap().locations().iter().next().unwrap();
    let high = memory.access(write).unwrap().locations().iter().next().unwrap();

    assert_eq!(low.unit_range(), Some((0, 3)));
    assert_eq!(high.unit_range(), Some((4, 7)));
    assert!(!low.overlaps(high));
    assert!(memory.is_location_read_only(low));
    assert!(!memory.is_location_read_only(high));
    assert!(!memory.is_location_read_only(&root));
    assert_eq!(memory.port_usage(port), PortAccess::READ_WRITE);
}

#[test]
fn pointer_through_cast_and_offset() {
    let mut design = Design::new(Options::default());
    let memory = design.create_memory(32);
    let root = design
        .allocate(memory, LogicalValue::zero(16, BYTES), None)
        .unwrap();
    let port = design
        .memory_mut(memory)
        .unwrap()
        .create_port(PortAccess::READ);
    let pointer = design.add_deferred_constant(root.clone(), 32).unwrap();
    let cast = design.add_node(Operation::Cast, vec![pointer]).unwrap();
    let eight = design.add_constant(8, 32).unwrap();
    let sum = design.add_node(Operation::Add, vec![cast, eight]).unwrap();
    let read = design
        .add_read(memory, port, sum, Addressing::Offset(0), 4)
        .unwrap();

    let points_to = points_to::resolve(&mut design).unwrap();

    let locations = points_to.accessed_locations(read).unwrap();
    assert_eq!(locations.len(), 1);
    let location = locations.iter().next().unwrap();
    assert!(location.is_fixed());
    assert_eq!(location.unit_range(), Some((8, 11)));
    assert_eq!(
        points_to.address_sources(read).unwrap(),
        &vec![AddressSource::Node(pointer)].into_iter().collect()
    );
}

// A pointer incremented around a loop, then read.
fn walking_pointer() -> (Design, Location, usize) {
    let mut design = Design::new(Options::default());
    let memory = design.create_memory(32);
    let root = design
        .allocate(memory, LogicalValue::zero(16, BYTES), None)
        .unwrap();
    let port = design
        .memory_mut(memory)
        .unwrap()
        .create_port(PortAccess::READ);
    let start = design.add_deferred_constant(root.clone(), 32).unwrap();
    let latch = design.add_node(Operation::Latch, vec![start]).unwrap();
    let one = design.add_constant(1, 32).unwrap();
    let next = design.add_node(Operation::Add, vec![latch, one]).unwrap();
    design.graph_mut().set_input(latch, 1, next).unwrap();
    let read = design
        .add_read(memory, port, next, Addressing::Offset(0), 1)
        .unwrap();
    (design, root, read)
}

#[test]
fn feedback_widens_to_an_index() {
    let (mut design, root, read) = walking_pointer();

    let points_to = points_to::resolve(&mut design).unwrap();

    assert_eq!(points_to.location_sweeps(), 2);
    assert_eq!(points_to.sweeps(), 4);
    let locations = points_to.accessed_locations(read).unwrap();
    assert!(locations.contains(&root.create_index(1)));
    assert!(locations.iter().all(|location| location.root_key() == root.root_key()));
}

#[test]
fn facts_only_grow() {
    let (design, _, _) = walking_pointer();

    let points_to = points_to::analyze(&design).unwrap();
    let history = points_to.history();

    assert_eq!(history.len(), points_to.sweeps());
    assert!(history.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(history.len() >= 2);
    assert_eq!(history[history.len() - 1], history[history.len() - 2]);
}

#[test]
fn resolution_is_idempotent() {
    let (mut design, _, _) = walking_pointer();

    points_to::resolve(&mut design).unwrap();
    let first: Vec<_> = design
        .memories()
        .map(|memory| memory.accesses().clone())
        .collect();
    points_to::resolve(&mut design).unwrap();
    let second: Vec<_> = design
        .memories()
        .map(|memory| memory.accesses().clone())
        .collect();

    assert_eq!(first, second);
}

#[test]
fn deferred_constants_lock_once() {
    let mut design = Design::new(Options::default());
    let memory = design.create_memory(32);
    design
        .allocate(memory, LogicalValue::zero(12, BYTES), None)
        .unwrap();
    let target = design
        .allocate(memory, LogicalValue::zero(4, BYTES), None)
        .unwrap();
    let node = design.add_deferred_constant(target.clone(), 32).unwrap();

    let constant = design.deferred_constant(node).unwrap();
    assert!(!constant.is_locked());
    assert_eq!(constant.value(Endian::Little), None);
    assert!(constant.units().units().iter().all(|unit| !unit.is_locked()));

    design.memory_mut(memory).unwrap().assign_base_addresses(0x100);
    assert_eq!(design.lock_deferred_constants().unwrap(), 1);

    let constant = design.deferred_constant(node).unwrap();
    assert!(constant.is_locked());
    assert_eq!(constant.value(Endian::Little), Some(0x10c));
    assert!(design.retarget_deferred_constant(node, target).is_err());
}

#[test]
fn record_slices_match_their_components() {
    let mut design = Design::new(Options::default());
    let memory = design.create_memory(32);
    let root = design
        .allocate(
            memory,
            LogicalValue::record(vec![
                LogicalValue::scalar(0xbbaa, 16, BYTES, Endian::Little),
                LogicalValue::scalar(0xddcc, 16, BYTES, Endian::Little),
            ]),
            None,
        )
        .unwrap();
    let memory = design.memory(memory).unwrap();

    let numeric = |location: &Location| {
        memory
            .initial_value(location)
            .unwrap()
            .to_constant()
            .unwrap()
            .numeric(Endian::Little)
    };
    assert_eq!(numeric(&root.create_offset(2, 0)), Some(0xbbaa));
    assert_eq!(numeric(&root.create_offset(2, 2)), Some(0xddcc));
    assert_eq!(numeric(&root.create_offset(2, 1)), Some(0xccbb));
    assert_eq!(numeric(&root), Some(0xddcc_bbaa));

    assert!(memory.initial_value(&root.create_index(2)).is_err());
    assert!(memory.initial_value(&root.create_offset(2, 3)).is_err());
}
