//! Device identity.
//!
//! The MQTT client identifier is derived from the station MAC address so every
//! board gets a stable, unique name without any configuration.

use core::fmt;

/// Prefix of every client identifier.
pub const CLIENT_ID_PREFIX: &str = "ESP-";

/// Length of a client identifier: the prefix plus twelve hex digits.
pub const CLIENT_ID_LEN: usize = CLIENT_ID_PREFIX.len() + 12;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// MQTT client identifier of the form `ESP-XXXXXXXXXXXX`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    bytes: [u8; CLIENT_ID_LEN],
}

impl ClientId {
    /// Builds the identifier from a six byte hardware address.
    pub fn from_mac(mac: &[u8; 6]) -> Self {
        let mut bytes = [0u8; CLIENT_ID_LEN];
        bytes[..CLIENT_ID_PREFIX.len()].copy_from_slice(CLIENT_ID_PREFIX.as_bytes());
        for (i, octet) in mac.iter().enumerate() {
            let at = CLIENT_ID_PREFIX.len() + i * 2;
            bytes[at] = HEX_UPPER[(octet >> 4) as usize];
            bytes[at + 1] = HEX_UPPER[(octet & 0x0F) as usize];
        }
        Self { bytes }
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII is ever written into `bytes`.
        core::str::from_utf8(&self.bytes).unwrap_or_default()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ClientId {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str())
    }
}
