//! Device identifier written into every candidate record

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, TagalongError};

/// Four-byte deployment identifier, written big-endian into record bytes 2..6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DeviceIdRepr", into = "String")]
pub struct DeviceId(u32);

impl DeviceId {
    /// Create a device identifier from its numeric value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Bytes in record order (big-endian).
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self(0xDEAD_BEEF)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = TagalongError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
            None => s.replace('_', "").parse::<u32>(),
        };
        parsed
            .map(Self)
            .map_err(|e| TagalongError::parse("device id", format!("'{}': {}", s, e)))
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceIdRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<DeviceIdRepr> for DeviceId {
    type Error = TagalongError;

    fn try_from(repr: DeviceIdRepr) -> Result<Self> {
        match repr {
            DeviceIdRepr::Number(n) => u32::try_from(n).map(Self).map_err(|_| {
                TagalongError::parse("device id", format!("{} does not fit in 32 bits", n))
            }),
            DeviceIdRepr::Text(s) => s.parse(),
        }
    }
}
