//! Symbolic memory regions.
//!
//! A `Location` describes a region of a `LogicalMemory` without knowing its
//! numeric address. Every allocation has one root location. All other
//! locations derive from a root through a chain of constant offsets and
//! unknown indices, and chasing `base` from any location ends at its root.
//!
//! Locations are descriptors, not unique objects. Two locations built
//! independently are equal when they cover the same window of the same root
//! with the same size, whatever chain produced them.

use crate::types::{AllocationId, MemoryId};
use crate::RC;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A symbolic region of memory.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Location {
    /// The whole of one allocation.
    Root {
        memory: MemoryId,
        allocation: AllocationId,
        size: usize,
    },
    /// `size` units starting `delta` units past the start of `base`.
    Offset {
        base: RC<Location>,
        delta: i64,
        size: usize,
    },
    /// `size` units at an unknown position within `base`.
    Index { base: RC<Location>, size: usize },
    /// No region. Used wherever a value does not designate memory.
    Invalid,
}

impl Location {
    /// Create the root location of an allocation.
    pub fn root(memory: MemoryId, allocation: AllocationId, size: usize) -> Location {
        Location::Root {
            memory,
            allocation,
            size,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Location::Root { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Location::Invalid)
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Location::Index { .. })
    }

    /// Returns true if this location is a single, statically known region:
    /// it is valid and there is no index anywhere in its chain.
    pub fn is_fixed(&self) -> bool {
        match self {
            Location::Root { .. } => true,
            Location::Offset { base, .. } => base.is_fixed(),
            Location::Index { .. } | Location::Invalid => false,
        }
    }

    /// The size of this location in addressable units.
    pub fn size(&self) -> usize {
        match self {
            Location::Root { size, .. }
            | Location::Offset { size, .. }
            | Location::Index { size, .. } => *size,
            Location::Invalid => 0,
        }
    }

    /// The location this location was derived from. Roots, and `Invalid`, are
    /// their own base.
    pub fn base(&self) -> &Location {
        match self {
            Location::Offset { base, .. } | Location::Index { base, .. } => &**base,
            Location::Root { .. } | Location::Invalid => self,
        }
    }

    /// The root this location is ultimately derived from.
    pub fn absolute_base(&self) -> &Location {
        let mut location = self;
        loop {
            match location {
                Location::Offset { base, .. } | Location::Index { base, .. } => {
                    location = &**base
                }
                Location::Root { .. } | Location::Invalid => return location,
            }
        }
    }

    /// Iterate over this location and every location in its base chain, this
    /// location first and the root last.
    pub fn chain(&self) -> impl Iterator<Item = &Location> {
        let mut next = Some(self);
        std::iter::from_fn(move || {
            let location = next?;
            next = match location {
                Location::Offset { base, .. } | Location::Index { base, .. } => Some(&**base),
                Location::Root { .. } | Location::Invalid => None,
            };
            Some(location)
        })
    }

    /// The memory and allocation of this location's root.
    pub fn root_key(&self) -> Option<(MemoryId, AllocationId)> {
        match self.absolute_base() {
            Location::Root {
                memory, allocation, ..
            } => Some((*memory, *allocation)),
            _ => None,
        }
    }

    /// The memory this location belongs to. `Invalid` belongs to no memory.
    pub fn memory(&self) -> Option<MemoryId> {
        self.root_key().map(|(memory, _)| memory)
    }

    pub fn allocation(&self) -> Option<AllocationId> {
        self.root_key().map(|(_, allocation)| allocation)
    }

    /// The minimum number of units past the start of `base()` this location
    /// may begin at.
    pub fn min_delta(&self) -> i64 {
        match self {
            Location::Offset { delta, .. } => *delta,
            Location::Root { .. } | Location::Index { .. } | Location::Invalid => 0,
        }
    }

    /// The maximum number of units past the start of `base()` this location
    /// may begin at.
    pub fn max_delta(&self) -> i64 {
        match self {
            Location::Offset { delta, .. } => *delta,
            Location::Index { base, size } => (base.size() as i64 - *size as i64).max(0),
            Location::Root { .. } | Location::Invalid => 0,
        }
    }

    /// `min_delta` relative to the root.
    pub fn abs_min_delta(&self) -> i64 {
        match self {
            Location::Offset { base, .. } | Location::Index { base, .. } => {
                base.abs_min_delta() + self.min_delta()
            }
            Location::Root { .. } | Location::Invalid => 0,
        }
    }

    /// `max_delta` relative to the root.
    pub fn abs_max_delta(&self) -> i64 {
        match self {
            Location::Offset { base, .. } | Location::Index { base, .. } => {
                base.abs_max_delta() + self.max_delta()
            }
            Location::Root { .. } | Location::Invalid => 0,
        }
    }

    /// The inclusive range of root units this location may touch, or `None`
    /// for locations which touch nothing.
    pub fn unit_range(&self) -> Option<(i64, i64)> {
        if self.size() == 0 || self.is_invalid() {
            return None;
        }
        Some((
            self.abs_min_delta(),
            self.abs_max_delta() + self.size() as i64 - 1,
        ))
    }

    /// Create a location of `size` units, `delta` units past the start of this
    /// location.
    pub fn create_offset(&self, size: usize, delta: i64) -> Location {
        match self {
            Location::Invalid => Location::Invalid,
            Location::Root { size: root_size, .. } if *root_size == size && delta == 0 => {
                self.clone()
            }
            // An unknown position plus a constant is still an unknown position.
            Location::Index { base, size: 0 } => base.create_index(size),
            _ => Location::Offset {
                base: RC::new(self.clone()),
                delta,
                size,
            },
        }
    }

    /// Create a location of `size` units at an unknown position within this
    /// location.
    pub fn create_index(&self, size: usize) -> Location {
        match self {
            Location::Invalid => Location::Invalid,
            Location::Offset { base, size: 0, .. } | Location::Index { base, .. } => {
                base.create_index(size)
            }
            _ => Location::Index {
                base: RC::new(self.clone()),
                size,
            },
        }
    }

    /// Returns true if this location and `other` may touch a common unit.
    ///
    /// Zero-sized locations overlap any location whose window contains their
    /// position.
    pub fn overlaps(&self, other: &Location) -> bool {
        match (self.root_key(), other.root_key()) {
            (Some(lhs), Some(rhs)) if lhs == rhs => {}
            _ => return false,
        }

        let (a_min, a_max) = self.window();
        let (b_min, b_max) = other.window();

        (a_min >= b_min && a_min < b_max) || (b_min >= a_min && b_min < a_max)
    }

    // Half-open window of root units.
    fn window(&self) -> (i64, i64) {
        (
            self.abs_min_delta(),
            self.abs_max_delta() + self.size() as i64,
        )
    }

    /// Rebuild this location's chain on top of a different root.
    pub fn duplicate_for_base(&self, base: &Location) -> Location {
        match self {
            Location::Root { .. } => base.clone(),
            Location::Offset {
                base: parent,
                delta,
                size,
            } => parent.duplicate_for_base(base).create_offset(*size, *delta),
            Location::Index { base: parent, size } => {
                parent.duplicate_for_base(base).create_index(*size)
            }
            Location::Invalid => Location::Invalid,
        }
    }

    /// Find this location's counterpart through a map from old roots to new
    /// roots. Returns `None` if this location's root is not in the map.
    pub fn correlate(
        &self,
        correlation: &BTreeMap<(MemoryId, AllocationId), Location>,
    ) -> Option<Location> {
        let key = self.root_key()?;
        correlation
            .get(&key)
            .map(|root| self.duplicate_for_base(root))
    }

    fn key(&self) -> (Option<(MemoryId, AllocationId)>, i64, i64, usize) {
        (
            self.root_key(),
            self.abs_min_delta(),
            self.abs_max_delta(),
            self.size(),
        )
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Location) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Location) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Location) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Location::Root {
                memory,
                allocation,
                size,
            } => write!(f, "{}.{}:{}", memory, allocation, size),
            Location::Offset { base, delta, size } => {
                write!(f, "({} + {}):{}", base, delta, size)
            }
            Location::Index { base, size } => write!(f, "({}[?]):{}", base, size),
            Location::Invalid => write!(f, "INVALID"),
        }
    }
}
