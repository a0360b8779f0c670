//! Bluetooth UUIDs
//!
//! Wraps `uuid::Uuid` so that the 16 and 32 bit aliases assigned by the Bluetooth SIG
//! compare equal to their full 128-bit form on the Bluetooth Base UUID.

use crate::core::constants::BLUETOOTH_BASE_SUFFIX;
use crate::core::error::ConfigError;
use btleplug::api::bleuuid::{uuid_from_u16, uuid_from_u32};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A normalized 128-bit Bluetooth UUID.
///
/// Equality and hashing only look at the normalized value, so `"2A9D"` and
/// `"00002a9d-0000-1000-8000-00805f9b34fb"` are the same `BtUuid`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BtUuid(Uuid);

impl BtUuid {
    /// Parses a UUID string, expanding 4 and 8 hex digit aliases first.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidUuidFormat` when the (expanded) string is not a UUID.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let is_hex = trimmed.chars().all(|c| c.is_ascii_hexdigit());
        let expanded = match trimmed.len() {
            4 if is_hex => format!("0000{trimmed}{BLUETOOTH_BASE_SUFFIX}"),
            8 if is_hex => format!("{trimmed}{BLUETOOTH_BASE_SUFFIX}"),
            _ => trimmed.to_string(),
        };
        Uuid::parse_str(&expanded)
            .map(Self)
            .map_err(|_| ConfigError::InvalidUuidFormat(raw.to_string()))
    }

    /// Expands a 16-bit SIG alias.
    pub const fn from_u16(short: u16) -> Self {
        Self(uuid_from_u16(short))
    }

    /// Expands a 32-bit SIG alias.
    pub const fn from_u32(short: u32) -> Self {
        Self(uuid_from_u32(short))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the 16-bit alias if this UUID lies on the Bluetooth Base UUID.
    pub fn to_short(&self) -> Option<u16> {
        let value = self.0.as_u128();
        let base = uuid_from_u16(0).as_u128();
        let alias_mask: u128 = 0xFFFF_FFFF << 96;
        if value & !alias_mask != base {
            return None;
        }
        u16::try_from(value >> 96).ok()
    }
}

impl From<Uuid> for BtUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<BtUuid> for Uuid {
    fn from(uuid: BtUuid) -> Self {
        uuid.0
    }
}

impl FromStr for BtUuid {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BtUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for BtUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_short() {
            Some(short) => write!(f, "BtUuid(0x{short:04X})"),
            None => write!(f, "BtUuid({})", self.0.hyphenated()),
        }
    }
}

impl Serialize for BtUuid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BtUuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
