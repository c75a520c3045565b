//! 64-bit radio hardware addresses.
//!
//! Configured and logged as 16 uppercase hex digits (`0013A200410809DD`).
//! On the wire the address is the 8 bytes of that hex string in order, which
//! is what actuator command payloads are prefixed with.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddress(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("hardware address '{0}' must be exactly 16 hex digits")]
    Length(String),
    #[error("hardware address '{0}' contains non-hex characters")]
    NotHex(String),
}

impl HardwareAddress {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Wire representation, most significant byte first.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl FromStr for HardwareAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(AddressError::Length(s.to_string()));
        }
        // from_str_radix accepts a leading '+', which is not a hex digit.
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Self::new)
            .map_err(|_| AddressError::NotHex(s.to_string()))
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl Serialize for HardwareAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip_uppercase() {
        let addr: HardwareAddress = "0013a200410809dd".parse().unwrap();
        assert_eq!(addr.to_string(), "0013A200410809DD");
    }

    #[test]
    fn wire_bytes_follow_hex_order() {
        let addr: HardwareAddress = "0013A200415D76BF".parse().unwrap();
        assert_eq!(
            addr.to_bytes(),
            [0x00, 0x13, 0xA2, 0x00, 0x41, 0x5D, 0x76, 0xBF]
        );
    }

    #[test]
    fn short_address_rejected() {
        assert!(matches!(
            "0013A2".parse::<HardwareAddress>(),
            Err(AddressError::Length(_))
        ));
    }

    #[test]
    fn non_hex_rejected() {
        assert!(matches!(
            "0013A20041080XDD".parse::<HardwareAddress>(),
            Err(AddressError::NotHex(_))
        ));
        assert!(matches!(
            "+013A200410809DD".parse::<HardwareAddress>(),
            Err(AddressError::NotHex(_))
        ));
    }

    #[test]
    fn serde_uses_hex_string() {
        let addr = HardwareAddress::new(0x0013_A200_4108_09E3);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0013A200410809E3\"");
        let back: HardwareAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
