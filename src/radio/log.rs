//! Dry-run driver that logs instead of transmitting.

use tracing::info;

use super::{ADVERTISING_DATA_LEN, ADVERTISING_PARAMETERS_LEN, RadioCommandKind, RadioDriver};
use crate::Result;
use crate::advert::ADDRESS_LEN;

/// Logs every command's parameter bytes at `info` and counts them.
#[derive(Debug, Default)]
pub struct LogDriver {
    commands: u64,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands seen so far.
    pub fn command_count(&self) -> u64 {
        self.commands
    }

    fn log(&mut self, command: RadioCommandKind, bytes: &[u8]) {
        self.commands += 1;
        info!("[dry-run] {}: {}", command, hex::encode(bytes));
    }
}

#[async_trait::async_trait]
impl RadioDriver for LogDriver {
    async fn set_random_address(&mut self, address: &[u8; ADDRESS_LEN]) -> Result<()> {
        self.log(RadioCommandKind::SetRandomAddress, address);
        Ok(())
    }

    async fn set_advertising_data(&mut self, data: &[u8; ADVERTISING_DATA_LEN]) -> Result<()> {
        self.log(RadioCommandKind::SetAdvertisingData, data);
        Ok(())
    }

    async fn set_advertising_parameters(
        &mut self,
        parameters: &[u8; ADVERTISING_PARAMETERS_LEN],
    ) -> Result<()> {
        self.log(RadioCommandKind::SetAdvertisingParameters, parameters);
        Ok(())
    }

    async fn set_advertising_enable(&mut self, enable: &[u8; 1]) -> Result<()> {
        self.log(RadioCommandKind::EnableAdvertising, enable);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_commands() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut driver = LogDriver::new();
        driver.set_random_address(&[1, 2, 3, 4, 5, 6]).await.unwrap();
        driver.set_advertising_enable(&[1]).await.unwrap();
        assert_eq!(driver.command_count(), 2);
    }
}
