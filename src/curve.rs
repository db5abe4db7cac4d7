//! P-224 compressed-point validity check.
//!
//! Relay devices only forward advertisements whose key decodes as a point on
//! NIST P-224, so every candidate record has to pass this check before it is
//! broadcast. Nothing here touches private keys.

use p224::PublicKey;

use crate::types::COMPRESSED_POINT_LEN;

/// Decides whether a 29-byte compressed-point string is acceptable as a key.
///
/// Implemented for [`P224Validator`] and for any `Fn(&[u8; 29]) -> bool`, which
/// lets tests drive the search with a predictable predicate.
pub trait PointValidator {
    fn is_valid_point(&self, compressed: &[u8; COMPRESSED_POINT_LEN]) -> bool;
}

impl<F> PointValidator for F
where
    F: Fn(&[u8; COMPRESSED_POINT_LEN]) -> bool,
{
    fn is_valid_point(&self, compressed: &[u8; COMPRESSED_POINT_LEN]) -> bool {
        self(compressed)
    }
}

/// SEC1 point decompression on P-224.
#[derive(Debug, Clone, Copy, Default)]
pub struct P224Validator;

impl PointValidator for P224Validator {
    fn is_valid_point(&self, compressed: &[u8; COMPRESSED_POINT_LEN]) -> bool {
        is_valid_compressed_point(compressed)
    }
}

/// Returns `true` when `bytes` decodes as a compressed P-224 point.
///
/// Wrong lengths, x-coordinates outside the field and quadratic non-residues
/// all yield `false`.
pub fn is_valid_compressed_point(bytes: &[u8]) -> bool {
    bytes.len() == COMPRESSED_POINT_LEN && PublicKey::from_sec1_bytes(bytes).is_ok()
}
