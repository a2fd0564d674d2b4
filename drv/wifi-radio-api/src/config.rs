// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration records for the repeater.
//!
//! These are loaded once from the external key/value store during init;
//! changes take effect on restart. The credential fields are fixed-size
//! byte buffers with explicit lengths, matching how the radio driver wants
//! them, rather than heap strings.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSPHRASE_MAX_LEN: usize = 64;

/// An 802.11 SSID: up to 32 octets, not necessarily UTF-8.
#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ssid {
    pub len: u8,
    pub bytes: [u8; SSID_MAX_LEN],
}

impl Ssid {
    pub const EMPTY: Self = Self {
        len: 0,
        bytes: [0; SSID_MAX_LEN],
    };

    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        if src.len() > SSID_MAX_LEN {
            return None;
        }
        let mut bytes = [0; SSID_MAX_LEN];
        bytes[..src.len()].copy_from_slice(src);
        Some(Self {
            len: src.len() as u8,
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len).min(SSID_MAX_LEN)]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SSIDs are usually printable; escape the rest.
        for &b in self.as_bytes() {
            if (0x20..0x7f).contains(&b) {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// A WPA passphrase: up to 64 octets. Deliberately no `Debug` contents.
#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passphrase {
    pub len: u8,
    #[serde(with = "BigArray")]
    pub bytes: [u8; PASSPHRASE_MAX_LEN],
}

impl Passphrase {
    pub const EMPTY: Self = Self {
        len: 0,
        bytes: [0; PASSPHRASE_MAX_LEN],
    };

    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        if src.len() > PASSPHRASE_MAX_LEN {
            return None;
        }
        let mut bytes = [0; PASSPHRASE_MAX_LEN];
        bytes[..src.len()].copy_from_slice(src);
        Some(Self {
            len: src.len() as u8,
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len).min(PASSPHRASE_MAX_LEN)]
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase({} octets)", self.len)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    Open,
    Wpa2Psk,
    Wpa3Psk,
    Wpa2Wpa3Psk,
}

/// Everything the core takes from the configuration store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeaterConfig {
    pub upstream_ssid: Ssid,
    pub upstream_passphrase: Passphrase,
    pub ap_ssid: Ssid,
    pub ap_passphrase: Passphrase,
    pub ap_auth: AuthMode,
    pub tx_power_dbm: i8,
    pub max_clients: u8,
    /// Present the upstream SSID on the AP interface instead of `ap_ssid`.
    pub clone_upstream_ssid: bool,
    /// Hot-path option: deliver only ARP broadcasts probing the repeater's
    /// own management address to the host stack; forward all other
    /// non-unicast frames at L2 only.
    pub ap_broadcast_filter: bool,
}

impl RepeaterConfig {
    pub const DEFAULT: Self = Self {
        upstream_ssid: Ssid::EMPTY,
        upstream_passphrase: Passphrase::EMPTY,
        ap_ssid: Ssid::EMPTY,
        ap_passphrase: Passphrase::EMPTY,
        ap_auth: AuthMode::Wpa2Psk,
        tx_power_dbm: 20,
        max_clients: crate::MAX_AP_CLIENTS as u8,
        clone_upstream_ssid: false,
        ap_broadcast_filter: false,
    };
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
