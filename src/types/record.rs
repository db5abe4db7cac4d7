//! Candidate key records and the rotating field threaded between them

use std::fmt;

use super::DeviceId;

/// Length of a candidate record in bytes (224 bits).
pub const RECORD_LEN: usize = 28;

/// Length of the compressed-point encoding checked by the curve validator.
pub const COMPRESSED_POINT_LEN: usize = RECORD_LEN + 1;

/// Length of the rotating field at the end of a record.
pub const ROTATING_LEN: usize = 16;

/// Magic prefix of every record.
pub const RECORD_MAGIC: [u8; 2] = [0xBA, 0xBE];

/// SEC1 prefix for a compressed point with even y.
pub const COMPRESSED_EVEN_PREFIX: u8 = 0x02;

const DEVICE_ID_RANGE: std::ops::Range<usize> = 2..6;
const DISCRIMINANT_RANGE: std::ops::Range<usize> = 6..8;
const MESSAGE_ID_RANGE: std::ops::Range<usize> = 8..12;
const ROTATING_RANGE: std::ops::Range<usize> = 12..RECORD_LEN;

/// The 16-byte rotating field carried from one chunk's key into the next.
///
/// All-zero at the start of each segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotatingState([u8; ROTATING_LEN]);

impl RotatingState {
    /// Fresh state for a new segment.
    pub fn zero() -> Self {
        Self([0; ROTATING_LEN])
    }

    pub fn from_bytes(bytes: [u8; ROTATING_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ROTATING_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

/// A 28-byte candidate record before or during the discriminant search.
///
/// Layout:
/// - `0..2` magic `BA BE`
/// - `2..6` device id, big-endian
/// - `6..8` discriminant, big-endian
/// - `8..12` message id, big-endian
/// - `12..28` rotating field
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyRecord([u8; RECORD_LEN]);

impl KeyRecord {
    /// Build a record with a zero discriminant.
    pub fn new(device_id: DeviceId, message_id: u32, rotating: &RotatingState) -> Self {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[..2].copy_from_slice(&RECORD_MAGIC);
        bytes[DEVICE_ID_RANGE].copy_from_slice(&device_id.to_bytes());
        bytes[MESSAGE_ID_RANGE].copy_from_slice(&message_id.to_be_bytes());
        bytes[ROTATING_RANGE].copy_from_slice(rotating.as_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_LEN] {
        &self.0
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(u32::from_be_bytes(read_array(&self.0[DEVICE_ID_RANGE])))
    }

    pub fn message_id(&self) -> u32 {
        u32::from_be_bytes(read_array(&self.0[MESSAGE_ID_RANGE]))
    }

    pub fn discriminant(&self) -> u16 {
        u16::from_be_bytes(read_array(&self.0[DISCRIMINANT_RANGE]))
    }

    pub fn set_discriminant(&mut self, value: u16) {
        self.0[DISCRIMINANT_RANGE].copy_from_slice(&value.to_be_bytes());
    }

    /// Current contents of bytes 12..28.
    pub fn rotating(&self) -> RotatingState {
        RotatingState(read_array(&self.0[ROTATING_RANGE]))
    }

    /// XOR `value` into the rotating field, addressed from the end of the record.
    ///
    /// Offset 0 is byte 27, offset 15 is byte 12; offsets wrap modulo 16.
    pub fn xor_from_end(&mut self, offset: usize, value: u8) {
        self.0[RECORD_LEN - 1 - (offset % ROTATING_LEN)] ^= value;
    }

    /// The record behind the even-y compressed-point prefix.
    pub fn compressed_point(&self) -> [u8; COMPRESSED_POINT_LEN] {
        let mut out = [0u8; COMPRESSED_POINT_LEN];
        out[0] = COMPRESSED_EVEN_PREFIX;
        out[1..].copy_from_slice(&self.0);
        out
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyRecord").field(&hex::encode(self.0)).finish()
    }
}

/// A record whose compressed-point encoding is a valid P-224 point.
///
/// Only the key search creates these.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ValidatedKey {
    record: KeyRecord,
    attempts: u32,
}

impl ValidatedKey {
    pub(crate) fn new(record: KeyRecord, attempts: u32) -> Self {
        Self { record, attempts }
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_LEN] {
        self.record.as_bytes()
    }

    pub fn record(&self) -> &KeyRecord {
        &self.record
    }

    pub fn discriminant(&self) -> u16 {
        self.record.discriminant()
    }

    pub fn message_id(&self) -> u32 {
        self.record.message_id()
    }

    /// Rotating state handed to the next chunk of the segment.
    pub fn rotating(&self) -> RotatingState {
        self.record.rotating()
    }

    /// Number of candidates checked before this one validated, including itself.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.record.0)
    }
}

impl fmt::Debug for ValidatedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedKey")
            .field("key", &self.to_hex())
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl fmt::Display for ValidatedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
