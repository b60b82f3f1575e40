//! Capability bitmask.
//!
//! The name table below is the only place a capability string becomes a
//! permission bit. Unknown names grant nothing.

use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Permissions granted to an app at install time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capability: u32 {
        const DISPLAY_WRITE = 1 << 0;
        const INPUT_READ = 1 << 1;
        const INPUT_WRITE = 1 << 2;
        const SENSOR_READ = 1 << 3;
        const RF_TRANSCEIVE = 1 << 4;
        const BT_SHELL = 1 << 5;
        const STORAGE_READ = 1 << 6;
        const STORAGE_WRITE = 1 << 7;
        const NETWORK = 1 << 8;
    }
}

/// Manifest name of every capability.
pub const CAPABILITY_TABLE: &[(&str, Capability)] = &[
    ("display.write", Capability::DISPLAY_WRITE),
    ("input.read", Capability::INPUT_READ),
    ("input.write", Capability::INPUT_WRITE),
    ("sensor.read", Capability::SENSOR_READ),
    ("rf.transceive", Capability::RF_TRANSCEIVE),
    ("bt.shell", Capability::BT_SHELL),
    ("storage.read", Capability::STORAGE_READ),
    ("storage.write", Capability::STORAGE_WRITE),
    ("network", Capability::NETWORK),
];

impl Capability {
    /// Exact lookup of a single manifest capability name.
    ///
    /// Only names in [`CAPABILITY_TABLE`] are honoured. The flag identifiers
    /// (`"DISPLAY_WRITE"`) are not manifest names and grant nothing.
    pub fn from_manifest_name(name: &str) -> Option<Capability> {
        CAPABILITY_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, cap)| *cap)
    }

    /// Union of the named capabilities; unknown names are skipped.
    pub fn from_names<'a, I>(names: I) -> Capability
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut mask = Capability::empty();
        for name in names {
            match Capability::from_manifest_name(name) {
                Some(cap) => mask |= cap,
                None => log::warn!("[Akira/Sandbox] Unknown capability '{}' ignored", name),
            }
        }
        mask
    }

    /// Manifest names of the bits set in `self`.
    pub fn names(self) -> Vec<&'static str> {
        CAPABILITY_TABLE
            .iter()
            .filter(|(_, cap)| self.contains(*cap))
            .map(|(n, _)| *n)
            .collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        for (i, name) in self.names().iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_one_bit_per_name() {
        let mut seen = Capability::empty();
        for (name, cap) in CAPABILITY_TABLE {
            assert_eq!(cap.bits().count_ones(), 1, "{} must map to one bit", name);
            assert!(!seen.intersects(*cap), "{} reuses a bit", name);
            seen |= *cap;
        }
        assert_eq!(seen, Capability::all());
    }

    #[test]
    fn test_from_names_skips_unknown() {
        let mask = Capability::from_names(["display.write", "teleport", "sensor.read"]);
        assert_eq!(mask, Capability::DISPLAY_WRITE | Capability::SENSOR_READ);
    }

    #[test]
    fn test_no_wildcard() {
        for name in ["*", "all", "display.*", "", "DISPLAY.WRITE"] {
            assert_eq!(Capability::from_manifest_name(name), None);
        }
    }

    #[test]
    fn test_flag_identifiers_are_not_manifest_names() {
        for (_, cap) in CAPABILITY_TABLE {
            for (ident, _) in cap.iter_names() {
                assert_eq!(Capability::from_manifest_name(ident), None);
            }
        }
        assert_eq!(
            Capability::from_names(["DISPLAY_WRITE", "NETWORK"]),
            Capability::empty()
        );
        assert_eq!(
            Capability::from_manifest_name("display.write"),
            Some(Capability::DISPLAY_WRITE)
        );
    }

    #[test]
    fn test_display_lists_names() {
        let mask = Capability::INPUT_READ | Capability::NETWORK;
        assert_eq!(alloc::format!("{}", mask), "input.read,network");
        assert_eq!(alloc::format!("{}", Capability::empty()), "none");
    }
}
