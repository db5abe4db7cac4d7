//! Number of payload bits carried by one key

use serde::{Deserialize, Serialize};

use crate::{Result, TagalongError};

/// Chunk width in bits, always within `1..=8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChunkWidth(u8);

impl ChunkWidth {
    /// One key per payload byte.
    pub const BYTE: ChunkWidth = ChunkWidth(8);

    /// Create a width, rejecting anything outside `1..=8`.
    pub fn new(bits: u8) -> Result<Self> {
        if (1..=8).contains(&bits) {
            Ok(Self(bits))
        } else {
            Err(TagalongError::InvalidChunkWidth { width: bits })
        }
    }

    /// Width in bits.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Mask selecting the low `bits` bits.
    pub fn mask(&self) -> u8 {
        (((1u16 << self.0) - 1) & 0xFF) as u8
    }

    /// Number of chunks needed for `len` bytes, the last one zero-extended.
    pub fn chunk_count(&self, len: usize) -> usize {
        (len * 8).div_ceil(self.0 as usize)
    }
}

impl Default for ChunkWidth {
    fn default() -> Self {
        Self::BYTE
    }
}

impl TryFrom<u8> for ChunkWidth {
    type Error = TagalongError;

    fn try_from(bits: u8) -> Result<Self> {
        Self::new(bits)
    }
}

impl From<ChunkWidth> for u8 {
    fn from(width: ChunkWidth) -> Self {
        width.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_widths() {
        assert!(matches!(ChunkWidth::new(0), Err(TagalongError::InvalidChunkWidth { width: 0 })));
        assert!(matches!(ChunkWidth::new(9), Err(TagalongError::InvalidChunkWidth { width: 9 })));
        for bits in 1..=8 {
            assert_eq!(ChunkWidth::new(bits).unwrap().bits(), bits);
        }
    }

    #[test]
    fn masks_cover_width() {
        assert_eq!(ChunkWidth::new(1).unwrap().mask(), 0b1);
        assert_eq!(ChunkWidth::new(3).unwrap().mask(), 0b111);
        assert_eq!(ChunkWidth::BYTE.mask(), 0xFF);
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(ChunkWidth::BYTE.chunk_count(3), 3);
        assert_eq!(ChunkWidth::new(3).unwrap().chunk_count(1), 3);
        assert_eq!(ChunkWidth::new(3).unwrap().chunk_count(16), 43);
        assert_eq!(ChunkWidth::new(1).unwrap().chunk_count(2), 16);
        assert_eq!(ChunkWidth::new(5).unwrap().chunk_count(0), 0);
    }
}
