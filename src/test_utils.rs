//! Test doubles shared by unit tests and benchmarks.
//!
//! Provides radio drivers that record or reject commands instead of touching
//! hardware, and point validators with predictable acceptance so encoder and
//! transmitter tests do not depend on where P-224 points happen to fall.

#![cfg(any(test, feature = "benchmark"))]

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::advert::ADDRESS_LEN;
use crate::radio::{
    ADVERTISING_DATA_LEN, ADVERTISING_PARAMETERS_LEN, RadioCommandKind, RadioDriver,
};
use crate::types::COMPRESSED_POINT_LEN;
use crate::{Result, TagalongError};

/// One command seen by a [`RecordingDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: RadioCommandKind,
    pub bytes: Vec<u8>,
    pub at: Instant,
}

/// Radio driver that records every command with its timestamp.
#[derive(Debug, Default, Clone)]
pub struct RecordingDriver {
    calls: Vec<RecordedCall>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` once `enables` advertising-enable commands went through.
    pub fn cancelling_after(enables: usize, token: CancellationToken) -> Self {
        Self { cancel_after: Some((enables, token)), ..Self::default() }
    }

    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    /// Address bytes of every set-address call, in order.
    pub fn addresses(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter(|c| c.command == RadioCommandKind::SetRandomAddress)
            .map(|c| c.bytes.clone())
            .collect()
    }

    fn record(&mut self, command: RadioCommandKind, bytes: &[u8]) -> Result<()> {
        self.calls.push(RecordedCall { command, bytes: bytes.to_vec(), at: Instant::now() });
        if let Some((enables, token)) = &self.cancel_after {
            let seen =
                self.calls.iter().filter(|c| c.command == RadioCommandKind::EnableAdvertising);
            if seen.count() == *enables {
                token.cancel();
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RadioDriver for RecordingDriver {
    async fn set_random_address(&mut self, address: &[u8; ADDRESS_LEN]) -> Result<()> {
        self.record(RadioCommandKind::SetRandomAddress, address)
    }

    async fn set_advertising_data(&mut self, data: &[u8; ADVERTISING_DATA_LEN]) -> Result<()> {
        self.record(RadioCommandKind::SetAdvertisingData, data)
    }

    async fn set_advertising_parameters(
        &mut self,
        parameters: &[u8; ADVERTISING_PARAMETERS_LEN],
    ) -> Result<()> {
        self.record(RadioCommandKind::SetAdvertisingParameters, parameters)
    }

    async fn set_advertising_enable(&mut self, enable: &[u8; 1]) -> Result<()> {
        self.record(RadioCommandKind::EnableAdvertising, enable)
    }
}

/// Radio driver that rejects one kind of command.
///
/// With [`FailingDriver::first_only`] only the first broadcast that reaches the
/// command fails; later ones succeed.
#[derive(Debug, Clone)]
pub struct FailingDriver {
    fail_on: RadioCommandKind,
    remaining_failures: Option<u32>,
    attempted: u32,
    succeeded: Vec<RadioCommandKind>,
}

impl FailingDriver {
    pub fn new(fail_on: RadioCommandKind) -> Self {
        Self { fail_on, remaining_failures: None, attempted: 0, succeeded: Vec::new() }
    }

    pub fn first_only(fail_on: RadioCommandKind) -> Self {
        Self { remaining_failures: Some(1), ..Self::new(fail_on) }
    }

    /// Commands attempted, failed or not.
    pub fn attempted(&self) -> u32 {
        self.attempted
    }

    pub fn succeeded(&self) -> &[RadioCommandKind] {
        &self.succeeded
    }

    fn handle(&mut self, command: RadioCommandKind) -> Result<()> {
        self.attempted += 1;
        let should_fail = command == self.fail_on
            && match &mut self.remaining_failures {
                None => true,
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
            };

        if should_fail {
            Err(TagalongError::radio_failed(command, "injected failure"))
        } else {
            self.succeeded.push(command);
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RadioDriver for FailingDriver {
    async fn set_random_address(&mut self, _address: &[u8; ADDRESS_LEN]) -> Result<()> {
        self.handle(RadioCommandKind::SetRandomAddress)
    }

    async fn set_advertising_data(&mut self, _data: &[u8; ADVERTISING_DATA_LEN]) -> Result<()> {
        self.handle(RadioCommandKind::SetAdvertisingData)
    }

    async fn set_advertising_parameters(
        &mut self,
        _parameters: &[u8; ADVERTISING_PARAMETERS_LEN],
    ) -> Result<()> {
        self.handle(RadioCommandKind::SetAdvertisingParameters)
    }

    async fn set_advertising_enable(&mut self, _enable: &[u8; 1]) -> Result<()> {
        self.handle(RadioCommandKind::EnableAdvertising)
    }
}

/// Validator signature used by the helpers below.
pub type TestValidator = fn(&[u8; COMPRESSED_POINT_LEN]) -> bool;

/// Accepts every candidate, so the discriminant is always zero.
pub fn accept_all(_point: &[u8; COMPRESSED_POINT_LEN]) -> bool {
    true
}

/// Rejects every candidate.
pub fn reject_all(_point: &[u8; COMPRESSED_POINT_LEN]) -> bool {
    false
}

/// Accepts non-zero discriminants divisible by 3, so every search takes four attempts.
pub fn every_third(point: &[u8; COMPRESSED_POINT_LEN]) -> bool {
    let discriminant = u16::from_be_bytes([point[7], point[8]]);
    discriminant != 0 && discriminant % 3 == 0
}
