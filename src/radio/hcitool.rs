//! Radio driver backed by the BlueZ `hcitool` utility.

use tokio::process::Command;
use tracing::{debug, info};

use super::{
    ADVERTISING_DATA_LEN, ADVERTISING_PARAMETERS_LEN, OwnAddressType, RadioCommandKind,
    RadioDriver,
};
use crate::advert::ADDRESS_LEN;
use crate::{Result, TagalongError};

const OGF_LE: &str = "0x08";
const OGF_VENDOR: &str = "0x3f";
const OCF_VENDOR_WRITE_BD_ADDR: &str = "0x001";
const OCF_LE_SET_RANDOM_ADDRESS: &str = "0x0005";
const OCF_LE_SET_ADVERTISING_PARAMETERS: &str = "0x0006";
const OCF_LE_SET_ADVERTISING_DATA: &str = "0x0008";
const OCF_LE_SET_ADVERTISE_ENABLE: &str = "0x000a";

/// Sends HCI commands with `hcitool -i <interface> cmd <ogf> <ocf> <bytes>`.
///
/// With [`OwnAddressType::Public`] the address is written through the vendor
/// BD_ADDR command, after which the Bluetooth service is restarted so the
/// controller picks it up. With [`OwnAddressType::Random`] the standard LE
/// random address command is used instead and no restart happens.
#[derive(Debug, Clone)]
pub struct HciToolDriver {
    program: String,
    interface: String,
    address_type: OwnAddressType,
    restart_service: Option<String>,
}

impl HciToolDriver {
    pub fn new(interface: impl Into<String>, address_type: OwnAddressType) -> Self {
        Self {
            program: "hcitool".to_string(),
            interface: interface.into(),
            address_type,
            restart_service: Some("bluetooth".to_string()),
        }
    }

    /// Service to restart after a public address change; `None` skips the restart.
    pub fn with_restart_service(mut self, service: Option<String>) -> Self {
        self.restart_service = service;
        self
    }

    /// Use a different executable in place of `hcitool`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Argument list passed to the program for one command.
    pub fn command_args(&self, ogf: &str, ocf: &str, params: &[u8]) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.interface.clone(),
            "cmd".to_string(),
            ogf.to_string(),
            ocf.to_string(),
        ];
        args.extend(params.iter().map(|b| format!("{:02x}", b)));
        args
    }

    async fn run(
        &self,
        command: RadioCommandKind,
        ogf: &str,
        ocf: &str,
        params: &[u8],
    ) -> Result<()> {
        let args = self.command_args(ogf, ocf, params);
        debug!("{} {}", self.program, args.join(" "));

        let output = Command::new(&self.program).args(&args).output().await.map_err(|e| {
            TagalongError::radio_failed_with_source(
                command,
                format!("failed to spawn '{}'", self.program),
                Box::new(e),
            )
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            Err(TagalongError::radio_failed(
                command,
                format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
                ),
            ))
        }
    }

    async fn restart_radio_service(&self) -> Result<()> {
        let Some(service) = &self.restart_service else {
            return Ok(());
        };

        info!("Restarting {} service", service);
        let status = Command::new("systemctl")
            .args(["restart", service.as_str()])
            .status()
            .await
            .map_err(|e| {
                TagalongError::radio_failed_with_source(
                    RadioCommandKind::SetRandomAddress,
                    "failed to spawn 'systemctl'",
                    Box::new(e),
                )
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(TagalongError::radio_failed(
                RadioCommandKind::SetRandomAddress,
                format!("systemctl restart {} exited with {}", service, status),
            ))
        }
    }
}

#[async_trait::async_trait]
impl RadioDriver for HciToolDriver {
    async fn set_random_address(&mut self, address: &[u8; ADDRESS_LEN]) -> Result<()> {
        match self.address_type {
            OwnAddressType::Public => {
                self.run(
                    RadioCommandKind::SetRandomAddress,
                    OGF_VENDOR,
                    OCF_VENDOR_WRITE_BD_ADDR,
                    address,
                )
                .await?;
                self.restart_radio_service().await
            }
            OwnAddressType::Random => {
                self.run(
                    RadioCommandKind::SetRandomAddress,
                    OGF_LE,
                    OCF_LE_SET_RANDOM_ADDRESS,
                    address,
                )
                .await
            }
        }
    }

    async fn set_advertising_data(&mut self, data: &[u8; ADVERTISING_DATA_LEN]) -> Result<()> {
        self.run(RadioCommandKind::SetAdvertisingData, OGF_LE, OCF_LE_SET_ADVERTISING_DATA, data)
            .await
    }

    async fn set_advertising_parameters(
        &mut self,
        parameters: &[u8; ADVERTISING_PARAMETERS_LEN],
    ) -> Result<()> {
        self.run(
            RadioCommandKind::SetAdvertisingParameters,
            OGF_LE,
            OCF_LE_SET_ADVERTISING_PARAMETERS,
            parameters,
        )
        .await
    }

    async fn set_advertising_enable(&mut self, enable: &[u8; 1]) -> Result<()> {
        self.run(RadioCommandKind::EnableAdvertising, OGF_LE, OCF_LE_SET_ADVERTISE_ENABLE, enable)
            .await
    }
}
