use crate::memory::{Location, LogicalMemory, LogicalValue};
use crate::types::AllocationId;
use crate::Error;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A set of accessed locations whose windows overlap, within one root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocationCluster {
    locations: BTreeSet<Location>,
    start: i64,
    end: i64,
}

impl LocationCluster {
    fn new(location: Location) -> LocationCluster {
        let (start, end) = window(&location);
        let mut locations = BTreeSet::new();
        locations.insert(location);
        LocationCluster {
            locations,
            start,
            end,
        }
    }

    pub fn locations(&self) -> &BTreeSet<Location> {
        &self.locations
    }

    /// The first root unit any location of this cluster may touch.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// One past the last root unit any location of this cluster may touch.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// The size of the largest location in this cluster.
    pub fn max_size(&self) -> usize {
        self.locations
            .iter()
            .map(|location| location.size())
            .max()
            .unwrap_or(0)
    }

    fn touches(&self, start: i64, end: i64) -> bool {
        start < self.end && self.start < end
    }

    fn merge(&mut self, other: LocationCluster) {
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
        self.locations.extend(other.locations);
    }
}

// Half-open window of root units.
fn window(location: &Location) -> (i64, i64) {
    (
        location.abs_min_delta(),
        location.abs_max_delta() + location.size() as i64,
    )
}

/// Every accessed location of one allocation, grouped into clusters of
/// overlapping locations.
#[derive(Clone, Debug)]
pub struct BaseLocationMap {
    root: Location,
    clusters: Vec<LocationCluster>,
}

impl BaseLocationMap {
    pub fn new(root: Location) -> BaseLocationMap {
        BaseLocationMap {
            root,
            clusters: Vec::new(),
        }
    }

    pub fn root(&self) -> &Location {
        &self.root
    }

    /// Clusters, ordered by their first unit.
    pub fn clusters(&self) -> &[LocationCluster] {
        &self.clusters
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Add an accessed location, merging every cluster it overlaps.
    pub fn add_location(&mut self, location: Location) -> Result<(), Error> {
        if location.root_key() != self.root.root_key() {
            return Err(Error::Custom(format!(
                "{} is not derived from {}",
                location, self.root
            )));
        }

        let (start, end) = window(&location);
        let mut cluster = LocationCluster::new(location);
        let mut kept = Vec::with_capacity(self.clusters.len() + 1);
        for existing in self.clusters.drain(..) {
            if existing.touches(start, end) {
                cluster.merge(existing);
            } else {
                kept.push(existing);
            }
        }
        kept.push(cluster);
        kept.sort_by_key(|cluster| (cluster.start, cluster.end));
        self.clusters = kept;
        Ok(())
    }

    /// The size of the largest accessed location.
    pub fn max_size(&self) -> usize {
        self.clusters
            .iter()
            .map(|cluster| cluster.max_size())
            .max()
            .unwrap_or(0)
    }

    /// One past the last unit of the root any access may touch.
    pub fn end(&self) -> i64 {
        self.clusters
            .iter()
            .map(|cluster| cluster.end)
            .max()
            .unwrap_or(0)
    }

    /// The number of units at the end of the root no access touches.
    pub fn trimmable_units(&self) -> usize {
        let size = self.root.size() as i64;
        (size - self.end().max(0)).max(0) as usize
    }

    /// `initial_value` without its unaccessed tail, or `None` if nothing is
    /// trimmable.
    ///
    /// # Errors
    /// `Error::NonRemovableRange` if the tail cuts through a pointer.
    pub fn trimmed_value(&self, initial_value: &LogicalValue) -> Result<Option<LogicalValue>, Error> {
        let trimmable = self.trimmable_units();
        if trimmable == 0 {
            return Ok(None);
        }
        let size = self.root.size();
        initial_value
            .remove_range(size - trimmable, size - 1)
            .map(Some)
    }
}

impl fmt::Display for BaseLocationMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:", self.root)?;
        for cluster in &self.clusters {
            write!(f, " [{}, {})", cluster.start, cluster.end)?;
        }
        Ok(())
    }
}

/// Build one map per allocation of `memory` from its registered accesses.
/// Allocations no access touches get an empty map.
pub fn build_maps(memory: &LogicalMemory) -> Result<BTreeMap<AllocationId, BaseLocationMap>, Error> {
    let mut maps = BTreeMap::new();
    for allocation in memory.allocations() {
        maps.insert(
            allocation.id(),
            BaseLocationMap::new(memory.root(allocation.id())?),
        );
    }
    for registration in memory.accesses().values() {
        for location in registration.locations() {
            let allocation = location
                .allocation()
                .ok_or_else(|| Error::MemoryMismatch(location.to_string(), memory.id()))?;
            maps.get_mut(&allocation)
                .ok_or(Error::UnknownAllocation(memory.id(), allocation))?
                .add_location(location.clone())?;
        }
    }
    Ok(maps)
}
