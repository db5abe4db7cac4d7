//! Radio controller commands for one advertisement broadcast.
//!
//! Broadcasting a key takes four controller commands, always in this order:
//!
//! 1. set the device address (6 bytes, least significant first)
//! 2. set the advertising data (length octet followed by the 31-byte payload)
//! 3. set the advertising parameters (15 bytes)
//! 4. enable advertising
//!
//! [`RadioSequencer`] builds the parameter bytes and issues the commands to a
//! [`RadioDriver`], waiting a settle delay after every command and an extra
//! restart delay after the first two. How the commands reach the controller
//! is up to the driver: [`HciToolDriver`] shells out to `hcitool`,
//! [`LogDriver`] only logs them.

mod hcitool;
mod log;

pub use hcitool::HciToolDriver;
pub use log::LogDriver;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::advert::{ADDRESS_LEN, Advertisement, PAYLOAD_LEN};
use crate::{Result, TagalongError};

/// Length of the LE Set Advertising Data parameter block.
pub const ADVERTISING_DATA_LEN: usize = PAYLOAD_LEN + 1;

/// Length of the LE Set Advertising Parameters parameter block.
pub const ADVERTISING_PARAMETERS_LEN: usize = 15;

/// Non-connectable undirected advertising.
pub const ADV_NONCONN_IND: u8 = 0x03;

/// Advertise on channels 37, 38 and 39.
pub const ALL_CHANNELS: u8 = 0x07;

/// Controller bounds on the advertising interval, in 0.625 ms units.
pub const INTERVAL_UNITS_MIN: u16 = 0x0020;
pub const INTERVAL_UNITS_MAX: u16 = 0x4000;

/// The four commands of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioCommandKind {
    SetRandomAddress,
    SetAdvertisingData,
    SetAdvertisingParameters,
    EnableAdvertising,
}

impl RadioCommandKind {
    /// Broadcast order.
    pub const SEQUENCE: [RadioCommandKind; 4] = [
        RadioCommandKind::SetRandomAddress,
        RadioCommandKind::SetAdvertisingData,
        RadioCommandKind::SetAdvertisingParameters,
        RadioCommandKind::EnableAdvertising,
    ];

    /// Whether the radio service needs time to come back after this command.
    pub fn needs_restart_delay(&self) -> bool {
        matches!(self, RadioCommandKind::SetRandomAddress | RadioCommandKind::SetAdvertisingData)
    }
}

impl fmt::Display for RadioCommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioCommandKind::SetRandomAddress => "set address",
            RadioCommandKind::SetAdvertisingData => "set advertising data",
            RadioCommandKind::SetAdvertisingParameters => "set advertising parameters",
            RadioCommandKind::EnableAdvertising => "enable advertising",
        };
        f.write_str(name)
    }
}

/// Address type the controller advertises with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnAddressType {
    /// Rewrite the public BD_ADDR (needs a service restart).
    #[default]
    Public,
    /// Use the LE random address.
    Random,
}

impl OwnAddressType {
    pub fn code(&self) -> u8 {
        match self {
            OwnAddressType::Public => 0x00,
            OwnAddressType::Random => 0x01,
        }
    }
}

/// Advertising interval and address type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvertisingParameters {
    pub interval_ms: u32,
    pub own_address_type: OwnAddressType,
}

impl Default for AdvertisingParameters {
    fn default() -> Self {
        Self { interval_ms: 20, own_address_type: OwnAddressType::Public }
    }
}

impl AdvertisingParameters {
    /// Interval in controller units of 0.625 ms, clamped to the valid range.
    ///
    /// Older hcitool scripts wrote the millisecond value straight into the
    /// block, so 20 ms went out as `0x0014`. Here it becomes `0x0020`.
    pub fn interval_units(&self) -> u16 {
        let units = u64::from(self.interval_ms) * 8 / 5;
        units.clamp(u64::from(INTERVAL_UNITS_MIN), u64::from(INTERVAL_UNITS_MAX)) as u16
    }

    /// LE Set Advertising Parameters block.
    pub fn to_bytes(&self) -> [u8; ADVERTISING_PARAMETERS_LEN] {
        let interval = self.interval_units().to_le_bytes();
        let mut bytes = [0u8; ADVERTISING_PARAMETERS_LEN];
        bytes[0..2].copy_from_slice(&interval);
        bytes[2..4].copy_from_slice(&interval);
        bytes[4] = ADV_NONCONN_IND;
        bytes[5] = self.own_address_type.code();
        // bytes 6..13: peer address type and peer address stay zero
        bytes[13] = ALL_CHANNELS;
        bytes[14] = 0x00;
        bytes
    }
}

/// Delays between commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioTiming {
    /// After every command.
    pub settle_delay: Duration,
    /// Additionally after the address and data commands.
    pub restart_delay: Duration,
}

impl Default for RadioTiming {
    fn default() -> Self {
        Self { settle_delay: Duration::from_secs(1), restart_delay: Duration::from_secs(1) }
    }
}

impl RadioTiming {
    /// No waiting at all, for dry runs.
    pub fn immediate() -> Self {
        Self { settle_delay: Duration::ZERO, restart_delay: Duration::ZERO }
    }

    fn after(&self, command: RadioCommandKind) -> Duration {
        if command.needs_restart_delay() {
            self.settle_delay + self.restart_delay
        } else {
            self.settle_delay
        }
    }

    /// Total time one broadcast spends waiting.
    pub fn per_broadcast(&self) -> Duration {
        RadioCommandKind::SEQUENCE.iter().map(|c| self.after(*c)).sum()
    }
}

/// Parameter bytes of all four commands for one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioCommands {
    pub address: [u8; ADDRESS_LEN],
    pub data: [u8; ADVERTISING_DATA_LEN],
    pub parameters: [u8; ADVERTISING_PARAMETERS_LEN],
    pub enable: [u8; 1],
}

impl RadioCommands {
    pub fn new(advert: &Advertisement, parameters: &AdvertisingParameters) -> Self {
        let mut data = [0u8; ADVERTISING_DATA_LEN];
        data[0] = PAYLOAD_LEN as u8;
        data[1..].copy_from_slice(advert.payload.as_bytes());

        Self {
            address: advert.address.wire_order(),
            data,
            parameters: parameters.to_bytes(),
            enable: [0x01],
        }
    }

    /// Parameter bytes for `command`.
    pub fn bytes(&self, command: RadioCommandKind) -> &[u8] {
        match command {
            RadioCommandKind::SetRandomAddress => &self.address,
            RadioCommandKind::SetAdvertisingData => &self.data,
            RadioCommandKind::SetAdvertisingParameters => &self.parameters,
            RadioCommandKind::EnableAdvertising => &self.enable,
        }
    }
}

/// Trait for radio controllers
///
/// Each method receives the raw parameter bytes of one controller command.
/// Opcode selection and transport belong to the implementation. Errors should
/// be [`TagalongError::RadioCommand`]; the sequencer wraps anything else.
#[async_trait::async_trait]
pub trait RadioDriver: Send {
    /// Program the advertising address (least significant byte first).
    async fn set_random_address(&mut self, address: &[u8; ADDRESS_LEN]) -> Result<()>;

    /// Load the advertising data block (length octet plus payload).
    async fn set_advertising_data(&mut self, data: &[u8; ADVERTISING_DATA_LEN]) -> Result<()>;

    /// Configure interval, type and channel map.
    async fn set_advertising_parameters(
        &mut self,
        parameters: &[u8; ADVERTISING_PARAMETERS_LEN],
    ) -> Result<()>;

    /// Turn advertising on (`[0x01]`) or off (`[0x00]`).
    async fn set_advertising_enable(&mut self, enable: &[u8; 1]) -> Result<()>;
}

#[async_trait::async_trait]
impl<D: RadioDriver + ?Sized> RadioDriver for Box<D> {
    async fn set_random_address(&mut self, address: &[u8; ADDRESS_LEN]) -> Result<()> {
        (**self).set_random_address(address).await
    }

    async fn set_advertising_data(&mut self, data: &[u8; ADVERTISING_DATA_LEN]) -> Result<()> {
        (**self).set_advertising_data(data).await
    }

    async fn set_advertising_parameters(
        &mut self,
        parameters: &[u8; ADVERTISING_PARAMETERS_LEN],
    ) -> Result<()> {
        (**self).set_advertising_parameters(parameters).await
    }

    async fn set_advertising_enable(&mut self, enable: &[u8; 1]) -> Result<()> {
        (**self).set_advertising_enable(enable).await
    }
}

/// Issues the broadcast command sequence to a single driver.
///
/// The sequencer owns the driver, so nothing else writes to the radio while a
/// broadcast is in progress.
#[derive(Debug)]
pub struct RadioSequencer<D> {
    driver: D,
    parameters: AdvertisingParameters,
    timing: RadioTiming,
}

impl<D: RadioDriver> RadioSequencer<D> {
    pub fn new(driver: D, parameters: AdvertisingParameters, timing: RadioTiming) -> Self {
        Self { driver, parameters, timing }
    }

    pub fn parameters(&self) -> &AdvertisingParameters {
        &self.parameters
    }

    pub fn timing(&self) -> &RadioTiming {
        &self.timing
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Run the four commands once.
    ///
    /// # Errors
    ///
    /// Stops at the first failing command and reports it as
    /// [`TagalongError::RadioCommand`]. No retries.
    pub async fn broadcast(&mut self, advert: &Advertisement) -> Result<()> {
        let commands = RadioCommands::new(advert, &self.parameters);
        debug!("Broadcasting {} payload={}", advert.address, advert.payload.to_hex());

        for command in RadioCommandKind::SEQUENCE {
            let result = match command {
                RadioCommandKind::SetRandomAddress => {
                    self.driver.set_random_address(&commands.address).await
                }
                RadioCommandKind::SetAdvertisingData => {
                    self.driver.set_advertising_data(&commands.data).await
                }
                RadioCommandKind::SetAdvertisingParameters => {
                    self.driver.set_advertising_parameters(&commands.parameters).await
                }
                RadioCommandKind::EnableAdvertising => {
                    self.driver.set_advertising_enable(&commands.enable).await
                }
            };

            if let Err(e) = result {
                warn!("Radio command '{}' failed for {}: {}", command, advert.address, e);
                return Err(name_failed_command(command, e));
            }

            let delay = self.timing.after(command);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(())
    }

    /// Run the full sequence `times` times, stopping at the first failure.
    pub async fn broadcast_repeated(&mut self, advert: &Advertisement, times: u32) -> Result<()> {
        for repetition in 0..times {
            debug!("Broadcast {}/{} for {}", repetition + 1, times, advert.address);
            self.broadcast(advert).await?;
        }
        Ok(())
    }
}

fn name_failed_command(command: RadioCommandKind, error: TagalongError) -> TagalongError {
    match error {
        named @ TagalongError::RadioCommand { .. } => named,
        other => {
            TagalongError::radio_failed_with_source(command, other.to_string(), Box::new(other))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingDriver, RecordingDriver};
    use tokio::time::Instant;

    fn advert() -> Advertisement {
        let mut key = [0u8; 28];
        key[..6].copy_from_slice(&[0x3A, 0xBE, 0xDE, 0xAD, 0xBE, 0xEF]);
        key[27] = 0x41;
        Advertisement::from_key_bytes(&key)
    }

    #[test]
    fn interval_is_converted_to_controller_units() {
        let params = |ms| AdvertisingParameters { interval_ms: ms, ..Default::default() };
        assert_eq!(params(20).interval_units(), 0x0020);
        assert_eq!(&params(20).to_bytes()[..4], &[0x20, 0x00, 0x20, 0x00]);
        assert_eq!(params(100).interval_units(), 160);
        assert_eq!(params(1).interval_units(), INTERVAL_UNITS_MIN);
        assert_eq!(params(60_000).interval_units(), INTERVAL_UNITS_MAX);
    }

    #[test]
    fn parameter_block_layout() {
        let params =
            AdvertisingParameters { interval_ms: 100, own_address_type: OwnAddressType::Random };
        assert_eq!(
            params.to_bytes(),
            [0xA0, 0x00, 0xA0, 0x00, 0x03, 0x01, 0x00, 0, 0, 0, 0, 0, 0, 0x07, 0x00]
        );
        assert_eq!(AdvertisingParameters::default().to_bytes()[5], 0x00);
    }

    #[test]
    fn command_bytes_follow_advertisement() {
        let advert = advert();
        let commands = RadioCommands::new(&advert, &AdvertisingParameters::default());
        assert_eq!(commands.address, [0xEF, 0xBE, 0xAD, 0xDE, 0xBE, 0xFA]);
        assert_eq!(commands.data[0], 31);
        assert_eq!(&commands.data[1..], advert.payload.as_bytes());
        assert_eq!(commands.enable, [0x01]);
        assert_eq!(commands.bytes(RadioCommandKind::SetAdvertisingData).len(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_ordered_and_spaced() {
        let timing = RadioTiming {
            settle_delay: Duration::from_millis(1000),
            restart_delay: Duration::from_millis(500),
        };
        let mut sequencer =
            RadioSequencer::new(RecordingDriver::new(), AdvertisingParameters::default(), timing);
        let start = Instant::now();
        sequencer.broadcast(&advert()).await.unwrap();

        let calls = sequencer.driver().calls();
        let kinds: Vec<_> = calls.iter().map(|c| c.command).collect();
        assert_eq!(kinds, RadioCommandKind::SEQUENCE.to_vec());

        let offsets: Vec<_> = calls.iter().map(|c| c.at.duration_since(start)).collect();
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::from_millis(1500));
        assert_eq!(offsets[2], Duration::from_millis(3000));
        assert_eq!(offsets[3], Duration::from_millis(4000));
        assert_eq!(start.elapsed(), Duration::from_millis(5000));
        assert_eq!(timing.per_broadcast(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_broadcast_issues_every_command_each_time() {
        let mut sequencer = RadioSequencer::new(
            RecordingDriver::new(),
            AdvertisingParameters::default(),
            RadioTiming::default(),
        );
        sequencer.broadcast_repeated(&advert(), 3).await.unwrap();

        let calls = sequencer.driver().calls();
        assert_eq!(calls.len(), 12);
        for repetition in calls.chunks(4) {
            let kinds: Vec<_> = repetition.iter().map(|c| c.command).collect();
            assert_eq!(kinds, RadioCommandKind::SEQUENCE.to_vec());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_command_is_named_and_stops_sequence() {
        let driver = FailingDriver::new(RadioCommandKind::SetAdvertisingParameters);
        let mut sequencer =
            RadioSequencer::new(driver, AdvertisingParameters::default(), RadioTiming::immediate());
        let err = sequencer.broadcast_repeated(&advert(), 2).await.unwrap_err();

        assert!(matches!(
            err,
            TagalongError::RadioCommand { command: RadioCommandKind::SetAdvertisingParameters, .. }
        ));
        assert_eq!(sequencer.driver().attempted(), 3);
    }

    #[tokio::test]
    async fn boxed_drivers_forward_calls() {
        let boxed: Box<dyn RadioDriver> = Box::new(RecordingDriver::new());
        let mut sequencer =
            RadioSequencer::new(boxed, AdvertisingParameters::default(), RadioTiming::immediate());
        sequencer.broadcast(&advert()).await.unwrap();
    }
}
