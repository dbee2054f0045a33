//! Session options supplied by the controller before connection setup.

use serde::{Deserialize, Serialize};

use crate::x224::SecurityProtocols;

/// Connection options that parameterize the advertised settings and
/// capability blocks.
///
/// Set once by the session controller before the first encode; the setup
/// sequence never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Desktop width in pixels.
    pub width: u16,
    /// Desktop height in pixels.
    pub height: u16,
    /// Preferred color depth in bits per pixel.
    pub color_depth: u16,
    /// Keyboard layout identifier (0x409 is US).
    pub keyboard_layout: u32,
    /// Client machine name, truncated to what the core settings block holds.
    pub client_name: String,
    /// User name sent in the routing cookie; empty disables the cookie.
    pub username: String,
    /// Logon domain.
    pub domain: String,
    /// Security protocols to offer in the negotiation request.
    pub security: SecurityProtocols,
    /// Static virtual channels to request, by name.
    pub channels: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            color_depth: 24,
            keyboard_layout: 0x409,
            client_name: "farsight".to_string(),
            username: String::new(),
            domain: String::new(),
            security: SecurityProtocols::SSL | SecurityProtocols::HYBRID,
            channels: Vec::new(),
        }
    }
}

impl SessionOptions {
    /// Cookie user name, if one should be sent.
    #[must_use]
    pub fn cookie_user(&self) -> Option<&str> {
        if self.username.is_empty() { None } else { Some(&self.username) }
    }
}
