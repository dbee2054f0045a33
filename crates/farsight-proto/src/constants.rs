//! Symbolic protocol constants.
//!
//! Schema modules never hard-code wire tags inline; they pull them from a
//! [`ConstantTable`] constructed once at startup and passed by reference
//! into every catalog builder. A missing entry is a startup error
//! ([`ProtoError::MissingConstant`]), never a per-packet one, so a typo in
//! a schema surfaces the first time the table is consulted rather than deep
//! inside a decode.

use std::collections::HashMap;

use crate::errors::{ProtoError, Result};

/// Capability type tags (section `caps`).
pub mod caps {
    /// General capability set
    pub const GENERAL: u64 = 0x0001;
    /// Bitmap capability set
    pub const BITMAP: u64 = 0x0002;
    /// Drawing-order capability set
    pub const ORDER: u64 = 0x0003;
    /// Bitmap cache capability set (revision 1)
    pub const BITMAP_CACHE: u64 = 0x0004;
    /// Control capability set
    pub const CONTROL: u64 = 0x0005;
    /// Window activation capability set
    pub const ACTIVATION: u64 = 0x0007;
    /// Pointer capability set
    pub const POINTER: u64 = 0x0008;
    /// Share capability set
    pub const SHARE: u64 = 0x0009;
    /// Color table cache capability set
    pub const COLOR_CACHE: u64 = 0x000A;
    /// Sound capability set
    pub const SOUND: u64 = 0x000C;
    /// Input capability set
    pub const INPUT: u64 = 0x000D;
    /// Font capability set
    pub const FONT: u64 = 0x000E;
    /// Brush capability set
    pub const BRUSH: u64 = 0x000F;
    /// Glyph cache capability set
    pub const GLYPH_CACHE: u64 = 0x0010;
    /// Offscreen bitmap cache capability set
    pub const OFFSCREEN_CACHE: u64 = 0x0011;
    /// Virtual channel capability set
    pub const VIRTUAL_CHANNEL: u64 = 0x0014;
    /// Multifragment update capability set
    pub const MULTIFRAGMENT_UPDATE: u64 = 0x001A;
}

/// Settings-block type tags (section `settings`).
pub mod settings {
    /// Client core settings block
    pub const CS_CORE: u64 = 0xC001;
    /// Client security settings block
    pub const CS_SECURITY: u64 = 0xC002;
    /// Client network settings block
    pub const CS_NET: u64 = 0xC003;
    /// Server core settings block
    pub const SC_CORE: u64 = 0x0C01;
    /// Server security settings block
    pub const SC_SECURITY: u64 = 0x0C02;
    /// Server network settings block
    pub const SC_NET: u64 = 0x0C03;
}

/// Server certificate version tags (section `cert`).
pub mod cert {
    /// Proprietary server certificate
    pub const PROPRIETARY: u64 = 1;
    /// X.509 certificate chain
    pub const X509: u64 = 2;
}

/// Read-only table mapping symbolic constant names to wire values.
///
/// Keys are `section/name` pairs. The built-in table covers every tag the
/// shipped catalogs need; callers with protocol extensions can overlay
/// additional entries before handing the table out.
#[derive(Debug, Clone)]
pub struct ConstantTable {
    sections: HashMap<&'static str, HashMap<&'static str, u64>>,
}

impl ConstantTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self { sections: HashMap::new() }
    }

    /// Table pre-populated with the standard capability, settings-block,
    /// and certificate tags.
    #[must_use]
    pub fn builtin() -> Self {
        let mut table = Self::new();
        let caps_entries: [(&'static str, u64); 17] = [
            ("general", caps::GENERAL),
            ("bitmap", caps::BITMAP),
            ("order", caps::ORDER),
            ("bitmap_cache", caps::BITMAP_CACHE),
            ("control", caps::CONTROL),
            ("activation", caps::ACTIVATION),
            ("pointer", caps::POINTER),
            ("share", caps::SHARE),
            ("color_cache", caps::COLOR_CACHE),
            ("sound", caps::SOUND),
            ("input", caps::INPUT),
            ("font", caps::FONT),
            ("brush", caps::BRUSH),
            ("glyph_cache", caps::GLYPH_CACHE),
            ("offscreen_cache", caps::OFFSCREEN_CACHE),
            ("virtual_channel", caps::VIRTUAL_CHANNEL),
            ("multifragment_update", caps::MULTIFRAGMENT_UPDATE),
        ];
        for (name, value) in caps_entries {
            table.set("caps", name, value);
        }
        let settings_entries: [(&'static str, u64); 6] = [
            ("cs_core", settings::CS_CORE),
            ("cs_security", settings::CS_SECURITY),
            ("cs_net", settings::CS_NET),
            ("sc_core", settings::SC_CORE),
            ("sc_security", settings::SC_SECURITY),
            ("sc_net", settings::SC_NET),
        ];
        for (name, value) in settings_entries {
            table.set("settings", name, value);
        }
        table.set("cert", "proprietary", cert::PROPRIETARY);
        table.set("cert", "x509", cert::X509);
        table
    }

    /// Insert or overwrite an entry.
    pub fn set(&mut self, section: &'static str, name: &'static str, value: u64) {
        self.sections.entry(section).or_default().insert(name, value);
    }

    /// Look up an entry.
    ///
    /// # Errors
    ///
    /// [`ProtoError::MissingConstant`] if the section or name is absent.
    pub fn get(&self, section: &'static str, name: &'static str) -> Result<u64> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(name))
            .copied()
            .ok_or(ProtoError::MissingConstant { section, name })
    }
}

impl Default for ConstantTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_catalog_tags() {
        let table = ConstantTable::builtin();
        assert_eq!(table.get("caps", "general").unwrap(), 0x0001);
        assert_eq!(table.get("caps", "multifragment_update").unwrap(), 0x001A);
        assert_eq!(table.get("settings", "cs_core").unwrap(), 0xC001);
        assert_eq!(table.get("cert", "x509").unwrap(), 2);
    }

    #[test]
    fn missing_entry_names_the_key() {
        let table = ConstantTable::builtin();
        assert_eq!(
            table.get("caps", "holograms").unwrap_err(),
            ProtoError::MissingConstant { section: "caps", name: "holograms" }
        );
    }
}
