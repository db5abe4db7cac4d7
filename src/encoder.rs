//! Bit-packing of payload segments into validated keys.
//!
//! A payload is split into segments of at most 16 bytes. Each segment is read
//! as a little-endian bit string and cut into chunks of [`ChunkWidth`] bits.
//! Every chunk is XORed into a fresh candidate record at the matching bit
//! position, counted backwards from the last byte of the rotating field, and
//! the record is then run through the [`KeySearch`].
//!
//! The rotating field of the key for chunk `i` seeds the record for chunk
//! `i + 1`, so the last key of a segment holds the whole segment. That state
//! is an explicit value: [`ChunkEncoder::encode_chunk`] takes one and hands the
//! next one back, and [`SegmentEncoder`] threads it through a segment.
//!
//! ```rust
//! use tagalong::encoder::{ChunkEncoder, extract_chunk};
//! use tagalong::search::{KeySearch, SearchPolicy};
//! use tagalong::types::{ChunkWidth, DeviceId};
//!
//! assert_eq!(extract_chunk(b"A", ChunkWidth::new(4).unwrap(), 0), 0x1);
//! assert_eq!(extract_chunk(b"A", ChunkWidth::new(4).unwrap(), 1), 0x4);
//!
//! let encoder = ChunkEncoder::new(
//!     DeviceId::new(0xDEADBEEF),
//!     ChunkWidth::BYTE,
//!     KeySearch::p224(SearchPolicy::default()),
//! );
//! let keys = encoder.encode_segment(b"hi", 1).unwrap();
//! assert_eq!(keys.len(), 2);
//! ```

use tracing::debug;

use crate::curve::{P224Validator, PointValidator};
use crate::search::KeySearch;
use crate::types::{ChunkWidth, DeviceId, KeyRecord, ROTATING_LEN, RotatingState, ValidatedKey};
use crate::{Result, TagalongError};

/// Largest segment that fits the rotating field.
pub const MAX_SEGMENT_SIZE: usize = ROTATING_LEN;

/// One chunk of a segment and the key that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedChunk {
    pub index: usize,
    pub value: u8,
    pub key: ValidatedKey,
}

/// Split `payload` into segments of `segment_size` bytes, the last one shorter.
pub fn split_segments(payload: &[u8], segment_size: usize) -> Result<std::slice::Chunks<'_, u8>> {
    if !(1..=MAX_SEGMENT_SIZE).contains(&segment_size) {
        return Err(TagalongError::config(
            "encoding.segment_size",
            format!("{} is outside 1..={}", segment_size, MAX_SEGMENT_SIZE),
        ));
    }
    Ok(payload.chunks(segment_size))
}

/// Read the `width`-bit chunk at bit offset `index * width`.
///
/// Bits are taken LSB-first; a chunk that crosses a byte boundary takes its
/// low bits from the earlier byte. Bits past the end of `segment` read as zero.
pub fn extract_chunk(segment: &[u8], width: ChunkWidth, index: usize) -> u8 {
    let bit = index * width.bits() as usize;
    let byte = bit / 8;
    let window = u16::from_le_bytes([
        segment.get(byte).copied().unwrap_or(0),
        segment.get(byte + 1).copied().unwrap_or(0),
    ]);
    ((window >> (bit % 8)) as u8) & width.mask()
}

/// XOR a chunk value into `record` at bit position `index * width`.
///
/// Bit positions count from the end of the rotating field: byte 27 holds bits
/// 0..8, byte 26 bits 8..16, and so on, wrapping after 16 bytes. A chunk that
/// straddles a byte boundary spills its high bits into the next byte.
pub fn place_chunk(record: &mut KeyRecord, width: ChunkWidth, index: usize, value: u8) {
    let bit = index * width.bits() as usize;
    let offset = bit % 8;
    let start = bit / 8;
    let shifted = u16::from(value & width.mask()) << offset;

    record.xor_from_end(start, (shifted & 0xFF) as u8);
    if offset + width.bits() as usize > 8 {
        record.xor_from_end(start + 1, (shifted >> 8) as u8);
    }
}

/// Encodes segments for one device at a fixed chunk width.
#[derive(Debug, Clone)]
pub struct ChunkEncoder<V = P224Validator> {
    device_id: DeviceId,
    width: ChunkWidth,
    search: KeySearch<V>,
}

impl<V: PointValidator> ChunkEncoder<V> {
    pub fn new(device_id: DeviceId, width: ChunkWidth, search: KeySearch<V>) -> Self {
        Self { device_id, width, search }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn width(&self) -> ChunkWidth {
        self.width
    }

    /// Number of keys a segment of `len` bytes produces.
    pub fn chunk_count(&self, len: usize) -> usize {
        self.width.chunk_count(len)
    }

    /// Encode chunk `index` of `segment` starting from `state`.
    ///
    /// Returns the encoded chunk and the rotating state for the next chunk.
    ///
    /// # Errors
    ///
    /// [`TagalongError::SearchExhausted`] with the chunk index attached.
    pub fn encode_chunk(
        &self,
        state: &RotatingState,
        message_id: u32,
        segment: &[u8],
        index: usize,
    ) -> Result<(EncodedChunk, RotatingState)> {
        let value = extract_chunk(segment, self.width, index);
        let mut record = KeyRecord::new(self.device_id, message_id, state);
        place_chunk(&mut record, self.width, index, value);

        let key = self.search.find(record).map_err(|e| e.at_chunk(index))?;
        debug!("Chunk {}: value={:#04x} key={}", index, value, key);

        Ok((EncodedChunk { index, value, key }, key.rotating()))
    }

    /// Lazily encode every chunk of `segment` under `message_id`.
    pub fn segment<'a>(&'a self, segment: &'a [u8], message_id: u32) -> SegmentEncoder<'a, V> {
        SegmentEncoder {
            encoder: self,
            segment,
            message_id,
            state: RotatingState::zero(),
            next_index: 0,
            total: self.chunk_count(segment.len()),
            failed: false,
        }
    }

    /// Encode a whole segment, stopping at the first failed chunk.
    pub fn encode_segment(&self, segment: &[u8], message_id: u32) -> Result<Vec<EncodedChunk>> {
        self.segment(segment, message_id).collect()
    }
}

/// Iterator over the keys of one segment.
///
/// Owns the segment's rotating state, which starts at zero. After an error it
/// yields nothing further.
#[derive(Debug)]
pub struct SegmentEncoder<'a, V = P224Validator> {
    encoder: &'a ChunkEncoder<V>,
    segment: &'a [u8],
    message_id: u32,
    state: RotatingState,
    next_index: usize,
    total: usize,
    failed: bool,
}

impl<V> SegmentEncoder<'_, V> {
    /// Rotating state that the next chunk will start from.
    pub fn state(&self) -> &RotatingState {
        &self.state
    }

    pub fn message_id(&self) -> u32 {
        self.message_id
    }
}

impl<V: PointValidator> Iterator for SegmentEncoder<'_, V> {
    type Item = Result<EncodedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_index >= self.total {
            return None;
        }

        let index = self.next_index;
        self.next_index += 1;
        match self.encoder.encode_chunk(&self.state, self.message_id, self.segment, index) {
            Ok((chunk, next_state)) => {
                self.state = next_state;
                Some(Ok(chunk))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.total - self.next_index))
        }
    }
}

impl<V: PointValidator> std::iter::FusedIterator for SegmentEncoder<'_, V> {}
