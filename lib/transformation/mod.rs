//! Transformations which consume resolved memory accesses.
//!
//! Every transformation runs points-to resolution before it starts, so it
//! always sees a current access table, and returns the number of changes it
//! made. Transformations which move accesses between memories or locations
//! leave the access table consistent. Transformations which rewrite the
//! graph leave resolution results stale, and the next resolution picks the
//! changes up.

mod base_address;
mod base_location_map;
mod dual_port;
mod memory_splitter;
mod memory_to_register;
mod memory_trimmer;
mod read_only_fields;
mod rom_replication;

pub use self::base_address::base_address;
pub use self::base_location_map::{BaseLocationMap, LocationCluster};
pub use self::dual_port::dual_port;
pub use self::memory_splitter::memory_splitter;
pub use self::memory_to_register::memory_to_register;
pub use self::memory_trimmer::memory_trimmer;
pub use self::read_only_fields::read_only_fields;
pub use self::rom_replication::rom_replication;
