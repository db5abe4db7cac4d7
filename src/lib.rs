//! Payload transmission over offline-finding relay networks.
//!
//! TagAlong turns arbitrary bytes into a stream of beacon public keys. Each key
//! carries a small chunk of the payload and is broadcast as an offline-finding
//! advertisement; any nearby relay that forwards it to the network delivers the
//! chunk to whoever knows the device identifier and message ids to query for.
//!
//! # Pipeline
//!
//! - [`ChunkEncoder`] splits a segment into 1-8 bit chunks and folds them into a
//!   28-byte [`KeyRecord`] whose rotating field accumulates the segment.
//! - [`KeySearch`] varies the record's discriminant until the record is a valid
//!   compressed P-224 point, yielding a [`ValidatedKey`].
//! - [`Advertisement::assemble`] derives the device address and the 31-byte
//!   advertising payload from the key.
//! - [`RadioSequencer`] pushes the four controller commands through a
//!   [`RadioDriver`] with the settle and restart delays the controller needs.
//! - [`Transmitter`] drives all of the above for single payloads or for a
//!   [`RowSource`], resuming from a [`CheckpointStore`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tagalong::{Tagalong, TagalongConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> tagalong::Result<()> {
//!     let config = TagalongConfig::from_file("tagalong.yaml")?;
//!     let mut transmitter = Tagalong::hcitool(&config);
//!     let report = transmitter.send_payload(b"hello").await?;
//!     println!("{} keys broadcast", report.keys_broadcast);
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Encoding
pub mod advert;
pub mod curve;
pub mod encoder;
pub mod link_layer;
pub mod search;

// Transmission
pub mod checkpoint;
pub mod config;
pub mod radio;
pub mod source;
pub mod transmit;

// Core exports
pub use error::*;
pub use types::*;

pub use advert::{Advertisement, AdvertisementPayload, DeviceAddress};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::TagalongConfig;
pub use curve::{P224Validator, PointValidator};
pub use encoder::{ChunkEncoder, EncodedChunk, SegmentEncoder};
pub use link_layer::{LinkLayerFrame, build_frame};
pub use radio::{
    AdvertisingParameters, HciToolDriver, LogDriver, OwnAddressType, RadioCommandKind,
    RadioDriver, RadioSequencer, RadioTiming,
};
pub use search::{ExhaustionPolicy, KeySearch, SearchPolicy};
pub use source::{Column, CsvRowSource, Row, RowSource, VecRowSource};
pub use transmit::{
    Failure, KeySelection, MessageIdPolicy, PayloadReport, RunReport, TransmitSettings,
    Transmitter,
};

/// Entry point that wires a [`Transmitter`] from a [`TagalongConfig`].
///
/// # Examples
///
/// ## Dry run
/// ```rust,no_run
/// use tagalong::{Tagalong, TagalongConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> tagalong::Result<()> {
/// let mut transmitter = Tagalong::dry_run(&TagalongConfig::default());
/// transmitter.send_payload(b"ABC").await?;
/// # Ok(())
/// # }
/// ```
pub struct Tagalong;

impl Tagalong {
    /// Encoder for the configured device, chunk width and search policy.
    pub fn encoder(config: &TagalongConfig) -> ChunkEncoder {
        ChunkEncoder::new(
            config.device_id,
            config.encoding.chunk_width,
            KeySearch::p224(config.search),
        )
    }

    /// Transmitter over an arbitrary driver.
    pub fn transmitter<D: RadioDriver>(config: &TagalongConfig, driver: D) -> Transmitter<D> {
        let sequencer =
            RadioSequencer::new(driver, config.advertising_parameters(), config.radio_timing());
        Transmitter::new(Self::encoder(config), sequencer, config.transmit_settings())
    }

    /// Transmitter that drives the configured interface through `hcitool`.
    pub fn hcitool(config: &TagalongConfig) -> Transmitter<HciToolDriver> {
        Self::transmitter(config, config.hcitool_driver())
    }

    /// Transmitter that only logs the commands it would issue, without delays.
    pub fn dry_run(config: &TagalongConfig) -> Transmitter<LogDriver> {
        let sequencer = RadioSequencer::new(
            LogDriver::new(),
            config.advertising_parameters(),
            RadioTiming::immediate(),
        );
        Transmitter::new(Self::encoder(config), sequencer, config.transmit_settings())
    }
}
