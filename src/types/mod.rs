//! Core value types for key encoding.
//!
//! ## Architecture
//!
//! - [`DeviceId`] identifies the deployment and is written into every record
//! - [`ChunkWidth`] is the number of payload bits carried per key
//! - [`KeyRecord`] is a 28-byte candidate before the discriminant search
//! - [`ValidatedKey`] is a record that decodes as a P-224 point
//! - [`RotatingState`] is the 16-byte field threaded between keys of one segment
//!
//! ## Usage Example
//!
//! ```rust
//! use tagalong::types::{DeviceId, KeyRecord, RotatingState};
//!
//! let record = KeyRecord::new(DeviceId::new(0xDEADBEEF), 1, &RotatingState::zero());
//! assert_eq!(&record.as_bytes()[..6], &[0xBA, 0xBE, 0xDE, 0xAD, 0xBE, 0xEF]);
//! assert_eq!(record.discriminant(), 0);
//! ```

mod chunk_width;
mod device_id;
mod record;

pub use chunk_width::ChunkWidth;
pub use device_id::DeviceId;
pub use record::{
    COMPRESSED_EVEN_PREFIX, COMPRESSED_POINT_LEN, KeyRecord, RECORD_LEN, RECORD_MAGIC,
    ROTATING_LEN, RotatingState, ValidatedKey,
};
