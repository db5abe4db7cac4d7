//! Advertisement assembly from validated keys.
//!
//! A key is split across two places in an offline-finding advertisement: its
//! first six bytes become the device address (with the two top bits forced to
//! `11`, marking a static random address), and the remaining 22 bytes travel in
//! a manufacturer-specific AD structure together with the two bits the address
//! overwrote.

use std::fmt;

use crate::types::{RECORD_LEN, ValidatedKey};

/// Length of the device address.
pub const ADDRESS_LEN: usize = 6;

/// Full advertisement payload length, including the leading AD length octet.
pub const PAYLOAD_LEN: usize = 31;

/// Fixed prefix: AD length 30, manufacturer data, company 0x004C, offline
/// finding type 0x12, length 25, status byte.
pub const PAYLOAD_HEADER: [u8; 7] = [0x1e, 0xff, 0x4c, 0x00, 0x12, 0x19, 0x00];

const KEY_TAIL_START: usize = 6;
const KEY_BITS_INDEX: usize = PAYLOAD_HEADER.len() + (RECORD_LEN - KEY_TAIL_START);
const HINT_INDEX: usize = KEY_BITS_INDEX + 1;
const HINT: u8 = 0x00;

/// Six-byte device address in key order (most significant byte first).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress([u8; ADDRESS_LEN]);

impl DeviceAddress {
    pub fn from_key_bytes(key: &[u8; RECORD_LEN]) -> Self {
        let mut address = [0u8; ADDRESS_LEN];
        address.copy_from_slice(&key[..ADDRESS_LEN]);
        address[0] |= 0b1100_0000;
        Self(address)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Byte order the controller expects (least significant byte first).
    pub fn wire_order(&self) -> [u8; ADDRESS_LEN] {
        let mut wire = self.0;
        wire.reverse();
        wire
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceAddress({})", self)
    }
}

/// The 31-byte advertising data block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementPayload([u8; PAYLOAD_LEN]);

impl AdvertisementPayload {
    pub fn from_key_bytes(key: &[u8; RECORD_LEN]) -> Self {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..PAYLOAD_HEADER.len()].copy_from_slice(&PAYLOAD_HEADER);
        payload[PAYLOAD_HEADER.len()..KEY_BITS_INDEX].copy_from_slice(&key[KEY_TAIL_START..]);
        payload[KEY_BITS_INDEX] = key[0] >> 6;
        payload[HINT_INDEX] = HINT;
        Self(payload)
    }

    pub fn as_bytes(&self) -> &[u8; PAYLOAD_LEN] {
        &self.0
    }

    /// Length announced by the first octet.
    pub fn declared_len(&self) -> usize {
        self.0[0] as usize
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for AdvertisementPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AdvertisementPayload").field(&self.to_hex()).finish()
    }
}

/// Address and payload for one broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    pub address: DeviceAddress,
    pub payload: AdvertisementPayload,
}

impl Advertisement {
    /// Assemble the advertisement for a validated key.
    pub fn assemble(key: &ValidatedKey) -> Self {
        Self::from_key_bytes(key.as_bytes())
    }

    /// Assemble from raw key bytes, without checking they lie on the curve.
    pub fn from_key_bytes(key: &[u8; RECORD_LEN]) -> Self {
        Self {
            address: DeviceAddress::from_key_bytes(key),
            payload: AdvertisementPayload::from_key_bytes(key),
        }
    }

    /// Recover the 28 key bytes from address and payload.
    pub fn key_bytes(&self) -> [u8; RECORD_LEN] {
        let mut key = [0u8; RECORD_LEN];
        key[..ADDRESS_LEN].copy_from_slice(self.address.as_bytes());
        key[0] = (key[0] & 0b0011_1111) | (self.payload.0[KEY_BITS_INDEX] << 6);
        key[KEY_TAIL_START..]
            .copy_from_slice(&self.payload.0[PAYLOAD_HEADER.len()..KEY_BITS_INDEX]);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_key() -> [u8; RECORD_LEN] {
        let mut key = [0u8; RECORD_LEN];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key[0] = 0xBA;
        key
    }

    #[test]
    fn payload_layout_is_byte_exact() {
        let key = sample_key();
        let payload = AdvertisementPayload::from_key_bytes(&key);
        let bytes = payload.as_bytes();

        assert_eq!(bytes.len(), 31);
        assert_eq!(payload.declared_len(), 30);
        assert_eq!(&bytes[..7], &[0x1e, 0xff, 0x4c, 0x00, 0x12, 0x19, 0x00]);
        assert_eq!(&bytes[7..29], &key[6..]);
        assert_eq!(bytes[29], 0xBA >> 6);
        assert_eq!(bytes[30], 0x00);
    }

    #[test]
    fn address_forces_top_bits() {
        let address = DeviceAddress::from_key_bytes(&[0u8; RECORD_LEN]);
        assert_eq!(address.as_bytes(), &[0xC0, 0, 0, 0, 0, 0]);

        let address = DeviceAddress::from_key_bytes(&[0xFFu8; RECORD_LEN]);
        assert_eq!(address.as_bytes(), &[0xFF; 6]);
    }

    #[test]
    fn wire_order_reverses_address() {
        let address = DeviceAddress::from_key_bytes(&sample_key());
        assert_eq!(address.as_bytes(), &[0xFA, 1, 2, 3, 4, 5]);
        assert_eq!(address.wire_order(), [5, 4, 3, 2, 1, 0xFA]);
        assert_eq!(address.to_string(), "FA:01:02:03:04:05");
    }

    proptest! {
        #[test]
        fn prop_address_top_bits_always_set(key in prop::array::uniform28(any::<u8>())) {
            let advert = Advertisement::from_key_bytes(&key);
            prop_assert_eq!(advert.address.as_bytes()[0] & 0xC0, 0xC0);
            prop_assert_eq!(&advert.address.as_bytes()[1..], &key[1..6]);
        }

        #[test]
        fn prop_assembly_is_idempotent(key in prop::array::uniform28(any::<u8>())) {
            let first = Advertisement::from_key_bytes(&key);
            prop_assert_eq!(first, Advertisement::from_key_bytes(&key));
        }

        #[test]
        fn prop_key_survives_the_split(key in prop::array::uniform28(any::<u8>())) {
            let advert = Advertisement::from_key_bytes(&key);
            prop_assert_eq!(advert.key_bytes(), key);
            prop_assert_eq!(advert.payload.as_bytes()[29] & !0b11, 0);
        }
    }
}
