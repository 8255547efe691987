use crate::memory::{AddressStridePolicy, Location, LogicalValue};
use crate::types::{AllocationId, MemoryId, PortId};
use crate::Error;
use bitflags::bitflags;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

bitflags! {
    /// The kinds of access a memory port carries.
    #[derive(Deserialize, Serialize)]
    pub struct PortAccess: u32 {
        const NONE  = 0b00;
        const READ  = 0b01;
        const WRITE = 0b10;
        const READ_WRITE = 0b11;
    }
}

/// One declared region of a `LogicalMemory`, with the value it holds at
/// reset.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Allocation {
    id: AllocationId,
    initial_value: LogicalValue,
    name: Option<String>,
}

impl Allocation {
    pub fn id(&self) -> AllocationId {
        self.id
    }

    pub fn initial_value(&self) -> &LogicalValue {
        &self.initial_value
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The size of this allocation in addressable units.
    pub fn size(&self) -> usize {
        self.initial_value.size()
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemoryPort {
    id: PortId,
    access: PortAccess,
}

impl MemoryPort {
    pub fn id(&self) -> PortId {
        self.id
    }

    /// The kinds of access this port was declared to carry.
    pub fn access(&self) -> PortAccess {
        self.access
    }
}

/// The locations one access node may touch, as registered against a port.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccessRegistration {
    port: PortId,
    locations: BTreeSet<Location>,
    is_write: bool,
}

impl AccessRegistration {
    pub fn new(port: PortId, locations: BTreeSet<Location>, is_write: bool) -> AccessRegistration {
        AccessRegistration {
            port,
            locations,
            is_write,
        }
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn set_port(&mut self, port: PortId) {
        self.port = port;
    }

    pub fn locations(&self) -> &BTreeSet<Location> {
        &self.locations
    }

    pub fn is_write(&self) -> bool {
        self.is_write
    }
}

/// A memory as the program sees it: a set of allocations, accessed through
/// ports, before any decision is made about how it is built in hardware.
///
/// Besides its allocations, a logical memory keeps the table of resolved
/// accesses, which the points-to resolver replaces wholesale, and the set of
/// deferred constants which target it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LogicalMemory {
    id: MemoryId,
    address_width: usize,
    allocations: BTreeMap<AllocationId, Allocation>,
    next_allocation: usize,
    ports: BTreeMap<PortId, MemoryPort>,
    next_port: usize,
    accesses: BTreeMap<usize, AccessRegistration>,
    deferred_constants: BTreeSet<usize>,
    base_addresses: BTreeMap<AllocationId, u64>,
}

impl LogicalMemory {
    pub fn new(id: MemoryId, address_width: usize) -> LogicalMemory {
        LogicalMemory {
            id,
            address_width,
            allocations: BTreeMap::new(),
            next_allocation: 0,
            ports: BTreeMap::new(),
            next_port: 0,
            accesses: BTreeMap::new(),
            deferred_constants: BTreeSet::new(),
            base_addresses: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> MemoryId {
        self.id
    }

    /// The width, in bits, of addresses into this memory.
    pub fn address_width(&self) -> usize {
        self.address_width
    }

    /// Allocate a new region holding `initial_value`, and return its root
    /// location.
    pub fn allocate(&mut self, initial_value: LogicalValue, name: Option<String>) -> Location {
        let id = AllocationId::new(self.next_allocation);
        self.next_allocation += 1;
        let size = initial_value.size();
        self.allocations.insert(
            id,
            Allocation {
                id,
                initial_value,
                name,
            },
        );
        Location::root(self.id, id, size)
    }

    pub fn allocation(&self, id: AllocationId) -> Result<&Allocation, Error> {
        self.allocations
            .get(&id)
            .ok_or(Error::UnknownAllocation(self.id, id))
    }

    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }

    /// The root location of an allocation.
    pub fn root(&self, id: AllocationId) -> Result<Location, Error> {
        let allocation = self.allocation(id)?;
        Ok(Location::root(self.id, id, allocation.size()))
    }

    /// Replace the initial value of an allocation. The new value must be the
    /// same size as the old one.
    pub(crate) fn set_initial_value(
        &mut self,
        id: AllocationId,
        initial_value: LogicalValue,
    ) -> Result<(), Error> {
        let memory = self.id;
        let allocation = self
            .allocations
            .get_mut(&id)
            .ok_or(Error::UnknownAllocation(memory, id))?;
        if allocation.size() != initial_value.size() {
            return Err(Error::Custom(format!(
                "initial value of {} units does not fit {} of {} units",
                initial_value.size(),
                id,
                allocation.size()
            )));
        }
        allocation.initial_value = initial_value;
        Ok(())
    }

    /// Remove an allocation from this memory.
    pub fn delete(&mut self, id: AllocationId) -> Result<Allocation, Error> {
        self.base_addresses.remove(&id);
        self.allocations
            .remove(&id)
            .ok_or(Error::UnknownAllocation(self.id, id))
    }

    fn check_owns(&self, location: &Location) -> Result<AllocationId, Error> {
        match location.root_key() {
            Some((memory, allocation)) if memory == self.id => Ok(allocation),
            _ => Err(Error::MemoryMismatch(location.to_string(), self.id)),
        }
    }

    /// The value `location` holds at reset.
    ///
    /// # Errors
    /// `Error::IllegalInitialValueContext` if the location is not a single
    /// fixed region inside its allocation.
    pub fn initial_value(&self, location: &Location) -> Result<LogicalValue, Error> {
        if !location.is_fixed() {
            return Err(Error::IllegalInitialValueContext(format!(
                "{} is not a fixed location",
                location
            )));
        }
        let allocation = self.allocation(self.check_owns(location)?)?;
        let delta = location.abs_min_delta();
        if delta < 0 || delta as usize + location.size() > allocation.size() {
            return Err(Error::IllegalInitialValueContext(format!(
                "{} lies outside of its allocation",
                location
            )));
        }
        Ok(allocation
            .initial_value()
            .value_at_offset(delta as usize, location.size()))
    }

    /// The stride policy shared by every allocation in this memory.
    pub fn stride_policy(&self) -> Result<AddressStridePolicy, Error> {
        let mut policies = self
            .allocations
            .values()
            .map(|allocation| allocation.initial_value().stride_policy());
        let first = policies
            .next()
            .ok_or_else(|| Error::Custom(format!("{} has no allocations", self.id)))??;
        for policy in policies {
            let policy = policy?;
            if policy != first {
                return Err(Error::MixedStride(first.stride(), policy.stride()));
            }
        }
        Ok(first)
    }

    /// The total size of every allocation in addressable units.
    pub fn addressable_size(&self) -> usize {
        self.allocations.values().map(|allocation| allocation.size()).sum()
    }

    /// The total size of every allocation in bytes, rounded up.
    pub fn size_in_bytes(&self) -> Result<usize, Error> {
        if self.allocations.is_empty() {
            return Ok(0);
        }
        let bits = self.addressable_size() * self.stride_policy()?.stride();
        Ok((bits + 7) / 8)
    }

    pub fn create_port(&mut self, access: PortAccess) -> PortId {
        let id = PortId::new(self.next_port);
        self.next_port += 1;
        self.ports.insert(id, MemoryPort { id, access });
        id
    }

    pub fn port(&self, id: PortId) -> Result<&MemoryPort, Error> {
        self.ports.get(&id).ok_or(Error::UnknownPort(self.id, id))
    }

    pub fn ports(&self) -> impl Iterator<Item = &MemoryPort> {
        self.ports.values()
    }

    /// Remove a port. Any access still registered against it is dropped.
    pub fn remove_port(&mut self, id: PortId) -> Result<MemoryPort, Error> {
        let port = self.ports.remove(&id).ok_or(Error::UnknownPort(self.id, id))?;
        self.accesses.retain(|_, registration| registration.port != id);
        Ok(port)
    }

    /// Replace the entire access table. This is the single point at which
    /// resolution results become visible.
    pub fn replace_accesses(
        &mut self,
        accesses: BTreeMap<usize, AccessRegistration>,
    ) -> Result<(), Error> {
        for registration in accesses.values() {
            self.port(registration.port)?;
            for location in &registration.locations {
                self.check_owns(location)?;
            }
        }
        debug!(
            "{}: {} accesses registered",
            self.id,
            accesses.len()
        );
        self.accesses = accesses;
        Ok(())
    }

    /// Register a single access, replacing any prior registration of it.
    pub fn register_access(
        &mut self,
        node: usize,
        registration: AccessRegistration,
    ) -> Result<(), Error> {
        self.port(registration.port)?;
        for location in &registration.locations {
            self.check_owns(location)?;
        }
        self.accesses.insert(node, registration);
        Ok(())
    }

    pub fn remove_access(&mut self, node: usize) -> Option<AccessRegistration> {
        self.accesses.remove(&node)
    }

    /// Move a registered access to another port of this memory.
    pub fn move_access(&mut self, node: usize, port: PortId) -> Result<(), Error> {
        self.port(port)?;
        self.accesses
            .get_mut(&node)
            .ok_or_else(|| Error::Custom(format!("node {} has no access in {}", node, self.id)))?
            .set_port(port);
        Ok(())
    }

    pub fn accesses(&self) -> &BTreeMap<usize, AccessRegistration> {
        &self.accesses
    }

    pub fn access(&self, node: usize) -> Option<&AccessRegistration> {
        self.accesses.get(&node)
    }

    /// The access nodes registered against `port`.
    pub fn port_accesses(&self, port: PortId) -> Vec<usize> {
        self.accesses
            .iter()
            .filter(|(_, registration)| registration.port == port)
            .map(|(node, _)| *node)
            .collect()
    }

    /// The kinds of access actually registered against `port`.
    pub fn port_usage(&self, port: PortId) -> PortAccess {
        self.accesses
            .values()
            .filter(|registration| registration.port == port)
            .fold(PortAccess::NONE, |usage, registration| {
                usage
                    | if registration.is_write {
                        PortAccess::WRITE
                    } else {
                        PortAccess::READ
                    }
            })
    }

    pub fn reads(&self) -> Vec<usize> {
        self.accesses
            .iter()
            .filter(|(_, registration)| !registration.is_write)
            .map(|(node, _)| *node)
            .collect()
    }

    pub fn writes(&self) -> Vec<usize> {
        self.accesses
            .iter()
            .filter(|(_, registration)| registration.is_write)
            .map(|(node, _)| *node)
            .collect()
    }

    /// Returns true if no write is registered against this memory.
    pub fn is_read_only(&self) -> bool {
        self.accesses.values().all(|registration| !registration.is_write)
    }

    /// Returns true if no registered write may touch any unit of `location`.
    pub fn is_location_read_only(&self, location: &Location) -> bool {
        !self.accesses.values().any(|registration| {
            registration.is_write
                && registration
                    .locations
                    .iter()
                    .any(|written| written.overlaps(location))
        })
    }

    pub fn register_deferred_constant(&mut self, node: usize) {
        self.deferred_constants.insert(node);
    }

    pub fn unregister_deferred_constant(&mut self, node: usize) -> bool {
        self.deferred_constants.remove(&node)
    }

    /// The nodes of every deferred constant targeting this memory.
    pub fn deferred_constants(&self) -> &BTreeSet<usize> {
        &self.deferred_constants
    }

    /// Lay allocations out back to back, in allocation order, starting at
    /// `start`. Returns the first address past the last allocation.
    pub fn assign_base_addresses(&mut self, start: u64) -> u64 {
        let mut address = start;
        self.base_addresses.clear();
        for allocation in self.allocations.values() {
            self.base_addresses.insert(allocation.id, address);
            address += allocation.size() as u64;
        }
        address
    }

    /// Use base addresses decided by an external allocation stage.
    pub fn set_base_addresses(&mut self, base_addresses: BTreeMap<AllocationId, u64>) {
        self.base_addresses = base_addresses;
    }

    pub fn base_address(&self, allocation: AllocationId) -> Option<u64> {
        self.base_addresses.get(&allocation).cloned()
    }

    /// The numeric address of `location`: the base address of its allocation
    /// plus its minimum delta.
    pub fn address(&self, location: &Location) -> Result<u64, Error> {
        let allocation = self.check_owns(location)?;
        let base = self
            .base_address(allocation)
            .ok_or(Error::NoBaseAddress(self.id, allocation))?;
        let address = base as i64 + location.abs_min_delta();
        if address < 0 {
            return Err(Error::Custom(format!(
                "{} lies before the start of memory",
                location
            )));
        }
        Ok(address as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endian;

    const BYTES: AddressStridePolicy = AddressStridePolicy::BYTE_ADDRESSING;

    fn memory() -> LogicalMemory {
        LogicalMemory::new(MemoryId::new(0), 32)
    }

    #[test]
    fn allocations_are_laid_out_in_order() {
        let mut memory = memory();
        let first = memory.allocate(LogicalValue::zero(6, BYTES), Some("a".to_string()));
        let second = memory.allocate(LogicalValue::zero(2, BYTES), None);

        assert_eq!(memory.assign_base_addresses(0x40), 0x48);
        assert_eq!(memory.address(&first).unwrap(), 0x40);
        assert_eq!(memory.address(&second.create_offset(1, 1)).unwrap(), 0x47);
        assert_eq!(memory.addressable_size(), 8);
        assert_eq!(memory.size_in_bytes().unwrap(), 8);
        assert_eq!(memory.allocation(first.allocation().unwrap()).unwrap().name(), Some("a"));
    }

    #[test]
    fn initial_values_of_fixed_locations() {
        let mut memory = memory();
        let root = memory.allocate(
            LogicalValue::scalar(0x4433_2211, 32, BYTES, Endian::Little),
            None,
        );

        let value = memory.initial_value(&root.create_offset(2, 1)).unwrap();
        let units: Vec<u64> = value.units().unwrap().units().iter().map(|u| u.value()).collect();
        assert_eq!(units, vec![0x22, 0x33]);

        let error = memory.initial_value(&root.create_index(1)).unwrap_err();
        assert!(matches!(error, Error::IllegalInitialValueContext(_)));
        assert!(memory.initial_value(&Location::Invalid).is_err());
        assert!(memory.initial_value(&root.create_offset(2, 3)).is_err());
    }

    #[test]
    fn locations_of_other_memories_are_rejected() {
        let memory = memory();
        let foreign = Location::root(MemoryId::new(7), AllocationId::new(0), 4);
        assert!(matches!(
            memory.initial_value(&foreign),
            Err(Error::MemoryMismatch(_, _))
        ));
    }

    #[test]
    fn stride_policy_must_be_consistent() {
        let mut memory = memory();
        assert!(memory.stride_policy().is_err());
        memory.allocate(LogicalValue::zero(2, BYTES), None);
        assert_eq!(memory.stride_policy().unwrap(), BYTES);
        memory.allocate(LogicalValue::zero(2, AddressStridePolicy::new(16).unwrap()), None);
        assert!(matches!(memory.stride_policy(), Err(Error::MixedStride(8, 16))));
    }

    #[test]
    fn read_only_classification_uses_overlap() {
        let mut memory = memory();
        let root = memory.allocate(LogicalValue::zero(8, BYTES), None);
        let port = memory.create_port(PortAccess::READ_WRITE);

        let low = root.create_offset(4, 0);
        let high = root.create_offset(4, 4);

        let mut accesses = BTreeMap::new();
        accesses.insert(1, AccessRegistration::new(port, vec![low.clone()].into_iter().collect(), false));
        accesses.insert(2, AccessRegistration::new(port, vec![high.clone()].into_iter().collect(), true));
        memory.replace_accesses(accesses).unwrap();

        assert!(!memory.is_read_only());
        assert!(memory.is_location_read_only(&low));
        assert!(!memory.is_location_read_only(&high));
        assert!(!memory.is_location_read_only(&root));
        assert_eq!(memory.reads(), vec![1]);
        assert_eq!(memory.writes(), vec![2]);
        assert_eq!(memory.port_usage(port), PortAccess::READ_WRITE);
    }

    #[test]
    fn accesses_move_between_ports() {
        let mut memory = memory();
        let root = memory.allocate(LogicalValue::zero(4, BYTES), None);
        let first = memory.create_port(PortAccess::READ);
        let second = memory.create_port(PortAccess::READ);

        memory
            .register_access(3, AccessRegistration::new(first, vec![root].into_iter().collect(), false))
            .unwrap();
        memory.move_access(3, second).unwrap();

        assert!(memory.port_accesses(first).is_empty());
        assert_eq!(memory.port_accesses(second), vec![3]);
        assert!(memory.move_access(4, second).is_err());

        memory.remove_port(second).unwrap();
        assert!(memory.accesses().is_empty());
    }
}
