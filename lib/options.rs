//! Compilation options for memory resolution and the memory transformations.

use crate::types::Endian;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::default;

/// Various options which change the behavior of the resolver and of the
/// memory transformations.
///
/// Options can be built in code with `OptionsBuilder`, or loaded from json
/// with `Options::from_json`. Any field missing from the json takes its
/// default value.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Options {
    endian: Endian,
    register_conversion_limit: usize,
    rom_replication_limit: usize,
    force_single_port_roms: bool,
    allow_dual_port: bool,
    sweep_limit: Option<usize>,
}

impl Options {
    /// The default options: little endian, with replication disabled.
    pub fn new() -> Options {
        Options::default()
    }

    /// Parse options from a json document.
    pub fn from_json(json: &str) -> Result<Options, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// The byte order deferred constants are locked in. Defaults to little
    /// endian.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Memories of at most this many bytes are candidates for conversion to
    /// registers.
    pub fn register_conversion_limit(&self) -> usize {
        self.register_conversion_limit
    }

    pub fn set_register_conversion_limit(&mut self, limit: usize) {
        self.register_conversion_limit = limit;
    }

    /// The size, in KiB, a read-only memory may grow to when it is replicated.
    /// Zero disables replication.
    pub fn rom_replication_limit(&self) -> usize {
        self.rom_replication_limit
    }

    pub fn set_rom_replication_limit(&mut self, limit: usize) {
        self.rom_replication_limit = limit;
    }

    /// Whether replicated read-only memories get a single port instead of two.
    pub fn force_single_port_roms(&self) -> bool {
        self.force_single_port_roms
    }

    pub fn set_force_single_port_roms(&mut self, force: bool) {
        self.force_single_port_roms = force;
    }

    /// Whether memories may be given a second port.
    pub fn allow_dual_port(&self) -> bool {
        self.allow_dual_port
    }

    pub fn set_allow_dual_port(&mut self, allow: bool) {
        self.allow_dual_port = allow;
    }

    /// An optional cap on the number of resolver sweeps. Exceeding it is an
    /// error. There is no cap by default.
    pub fn sweep_limit(&self) -> Option<usize> {
        self.sweep_limit
    }

    pub fn set_sweep_limit(&mut self, sweep_limit: Option<usize>) {
        self.sweep_limit = sweep_limit;
    }
}

impl default::Default for Options {
    fn default() -> Options {
        Options {
            endian: Endian::Little,
            register_conversion_limit: 128,
            rom_replication_limit: 0,
            force_single_port_roms: false,
            allow_dual_port: true,
            sweep_limit: None,
        }
    }
}

/// Builds `Options` one knob at a time, starting from the defaults.
///
/// ```
/// use memres::options::OptionsBuilder;
///
/// let options = OptionsBuilder::new().rom_replication_limit(64).build();
/// assert_eq!(options.rom_replication_limit(), 64);
/// ```
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn new() -> OptionsBuilder {
        OptionsBuilder {
            options: Options::default(),
        }
    }

    pub fn endian(mut self, endian: Endian) -> OptionsBuilder {
        self.options.endian = endian;
        self
    }

    pub fn register_conversion_limit(mut self, limit: usize) -> OptionsBuilder {
        self.options.register_conversion_limit = limit;
        self
    }

    pub fn rom_replication_limit(mut self, limit: usize) -> OptionsBuilder {
        self.options.rom_replication_limit = limit;
        self
    }

    pub fn force_single_port_roms(mut self, force: bool) -> OptionsBuilder {
        self.options.force_single_port_roms = force;
        self
    }

    pub fn allow_dual_port(mut self, allow: bool) -> OptionsBuilder {
        self.options.allow_dual_port = allow;
        self
    }

    pub fn sweep_limit(mut self, sweep_limit: usize) -> OptionsBuilder {
        self.options.sweep_limit = Some(sweep_limit);
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

impl default::Default for OptionsBuilder {
    fn default() -> OptionsBuilder {
        OptionsBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let options = OptionsBuilder::new()
            .endian(Endian::Big)
            .rom_replication_limit(4)
            .sweep_limit(10)
            .build();

        assert_eq!(options.endian(), Endian::Big);
        assert_eq!(options.rom_replication_limit(), 4);
        assert_eq!(options.sweep_limit(), Some(10));
        assert_eq!(options.register_conversion_limit(), 128);
        assert!(options.allow_dual_port());
    }

    #[test]
    fn json_fills_missing_fields() {
        let options =
            Options::from_json(r#"{ "endian": "Big", "register_conversion_limit": 16 }"#).unwrap();

        assert_eq!(options.endian(), Endian::Big);
        assert_eq!(options.register_conversion_limit(), 16);
        assert_eq!(options.rom_replication_limit(), 0);
        assert_eq!(options.sweep_limit(), None);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            Options::from_json("{ \"endian\": 3 }"),
            Err(Error::Json(_))
        ));
    }
}
