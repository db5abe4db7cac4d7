//! YAML configuration.
//!
//! Every section is optional; missing keys fall back to the defaults below,
//! which reproduce the classic single-script setup (device `0xDEADBEEF`,
//! 8-bit chunks, 16-byte segments, three repeats, `hci0`).
//!
//! ```yaml
//! device_id: "0xDEADBEEF"
//! encoding:
//!   chunk_width: 8
//!   segment_size: 16
//!   key_selection: all
//! search:
//!   max_attempts: 65536
//!   on_exhausted: fail
//! message_ids:
//!   first: 0
//!   policy: per_segment
//! transmit:
//!   repeat_count: 3
//!   rounds: 1
//!   key_delay_ms: 100
//! radio:
//!   interface: hci0
//!   interval_ms: 20
//!   own_address_type: public
//!   settle_delay_ms: 1000
//!   restart_delay_ms: 1000
//!   restart_service: bluetooth
//! source:
//!   path: data.csv
//!   timestamp_column: Timestamp
//!   payload_column: Data_2
//!   has_headers: true
//!   resume_inclusive: false
//! checkpoint:
//!   path: last_processed_timestamp.txt
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::FileCheckpointStore;
use crate::encoder::MAX_SEGMENT_SIZE;
use crate::radio::{AdvertisingParameters, HciToolDriver, OwnAddressType, RadioTiming};
use crate::search::SearchPolicy;
use crate::source::{Column, CsvRowSource};
use crate::transmit::{KeySelection, MessageIdPolicy, TransmitSettings};
use crate::types::{ChunkWidth, DeviceId};
use crate::{Result, TagalongError};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TagalongConfig {
    pub device_id: DeviceId,
    pub encoding: EncodingConfig,
    pub search: SearchPolicy,
    pub message_ids: MessageIdConfig,
    pub transmit: TransmitConfig,
    pub radio: RadioConfig,
    pub source: SourceConfig,
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    pub chunk_width: ChunkWidth,
    pub segment_size: usize,
    pub key_selection: KeySelection,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            chunk_width: ChunkWidth::BYTE,
            segment_size: MAX_SEGMENT_SIZE,
            key_selection: KeySelection::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessageIdConfig {
    pub first: u32,
    pub policy: MessageIdPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransmitConfig {
    pub repeat_count: u32,
    pub rounds: u32,
    pub key_delay_ms: u64,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self { repeat_count: 3, rounds: 1, key_delay_ms: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RadioConfig {
    pub interface: String,
    pub interval_ms: u32,
    pub own_address_type: OwnAddressType,
    pub settle_delay_ms: u64,
    pub restart_delay_ms: u64,
    /// Service restarted after a public address change.
    pub restart_service: Option<String>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            interface: "hci0".to_string(),
            interval_ms: 20,
            own_address_type: OwnAddressType::Public,
            settle_delay_ms: 1000,
            restart_delay_ms: 1000,
            restart_service: Some("bluetooth".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub path: Option<PathBuf>,
    pub timestamp_column: Column,
    pub payload_column: Column,
    pub has_headers: bool,
    pub resume_inclusive: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            timestamp_column: Column::Name("Timestamp".to_string()),
            payload_column: Column::Name("Data_2".to_string()),
            has_headers: true,
            resume_inclusive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("last_processed_timestamp.txt") }
    }
}

impl TagalongConfig {
    /// Load and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TagalongError::file_error(path.to_path_buf(), e))?;
        debug!("Loaded {} bytes of configuration from {}", text.len(), path.display());
        Self::from_yaml_str(&text)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml_ng::from_str(yaml).map_err(|e| TagalongError::Parse {
            context: "configuration YAML".to_string(),
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| TagalongError::Parse {
            context: "configuration YAML".to_string(),
            details: e.to_string(),
        })
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SEGMENT_SIZE).contains(&self.encoding.segment_size) {
            return Err(TagalongError::config(
                "encoding.segment_size",
                format!("{} is outside 1..={}", self.encoding.segment_size, MAX_SEGMENT_SIZE),
            ));
        }
        if self.search.max_attempts == 0 {
            return Err(TagalongError::config("search.max_attempts", "must be at least 1"));
        }
        if self.transmit.repeat_count == 0 {
            return Err(TagalongError::config("transmit.repeat_count", "must be at least 1"));
        }
        if self.transmit.rounds == 0 {
            return Err(TagalongError::config("transmit.rounds", "must be at least 1"));
        }
        if self.radio.interface.trim().is_empty() {
            return Err(TagalongError::config("radio.interface", "must not be empty"));
        }
        if !self.source.has_headers
            && matches!(
                (&self.source.timestamp_column, &self.source.payload_column),
                (Column::Name(_), _) | (_, Column::Name(_))
            )
        {
            return Err(TagalongError::config(
                "source",
                "columns must be given by index when has_headers is false",
            ));
        }
        Ok(())
    }

    pub fn transmit_settings(&self) -> TransmitSettings {
        TransmitSettings {
            segment_size: self.encoding.segment_size,
            first_message_id: self.message_ids.first,
            message_ids: self.message_ids.policy,
            key_selection: self.encoding.key_selection,
            repeat_count: self.transmit.repeat_count,
            rounds: self.transmit.rounds,
            key_delay: Duration::from_millis(self.transmit.key_delay_ms),
            resume_inclusive: self.source.resume_inclusive,
        }
    }

    pub fn advertising_parameters(&self) -> AdvertisingParameters {
        AdvertisingParameters {
            interval_ms: self.radio.interval_ms,
            own_address_type: self.radio.own_address_type,
        }
    }

    pub fn radio_timing(&self) -> RadioTiming {
        RadioTiming {
            settle_delay: Duration::from_millis(self.radio.settle_delay_ms),
            restart_delay: Duration::from_millis(self.radio.restart_delay_ms),
        }
    }

    pub fn hcitool_driver(&self) -> HciToolDriver {
        HciToolDriver::new(self.radio.interface.clone(), self.radio.own_address_type)
            .with_restart_service(self.radio.restart_service.clone())
    }

    /// Open the configured CSV source, or `path` when given.
    pub fn csv_source(&self, path: Option<&Path>) -> Result<CsvRowSource> {
        let path = path.or(self.source.path.as_deref()).ok_or_else(|| {
            TagalongError::config("source.path", "no CSV file configured or given")
        })?;
        CsvRowSource::open(
            path,
            &self.source.timestamp_column,
            &self.source.payload_column,
            self.source.has_headers,
        )
    }

    pub fn checkpoint_store(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(self.checkpoint.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ExhaustionPolicy;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = TagalongConfig::from_yaml_str("").unwrap();
        assert_eq!(config, TagalongConfig::default());
        assert_eq!(config.device_id, DeviceId::new(0xDEADBEEF));
        assert_eq!(config.encoding.chunk_width, ChunkWidth::BYTE);
        assert_eq!(config.transmit.repeat_count, 3);
        assert_eq!(config.radio.interface, "hci0");
    }

    #[test]
    fn partial_yaml_overrides_selected_keys() {
        let config = TagalongConfig::from_yaml_str(
            r#"
device_id: "0x01020304"
encoding:
  chunk_width: 4
search:
  on_exhausted: wrap
  max_attempts: 200000
message_ids:
  policy: fixed
  first: 9
radio:
  own_address_type: random
  restart_service: null
source:
  timestamp_column: 0
  payload_column: 2
  has_headers: false
"#,
        )
        .unwrap();

        assert_eq!(config.device_id, DeviceId::new(0x01020304));
        assert_eq!(config.encoding.chunk_width.bits(), 4);
        assert_eq!(config.encoding.segment_size, 16);
        assert_eq!(config.search.on_exhausted, ExhaustionPolicy::Wrap);
        assert_eq!(config.search.attempt_limit(), 200_000);
        assert_eq!(config.message_ids.policy, MessageIdPolicy::Fixed);
        assert_eq!(config.radio.restart_service, None);
        assert_eq!(config.source.payload_column, Column::Index(2));

        let settings = config.transmit_settings();
        assert_eq!(settings.first_message_id, 9);
        assert_eq!(settings.key_delay, Duration::from_millis(100));
        assert_eq!(config.advertising_parameters().own_address_type, OwnAddressType::Random);
    }

    #[test]
    fn defaults_round_trip_through_yaml() {
        let original = TagalongConfig::default();
        let yaml = original.to_yaml().unwrap();
        assert_eq!(TagalongConfig::from_yaml_str(&yaml).unwrap(), original);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            "encoding:\n  chunk_width: 9\n",
            "encoding:\n  chunk_width: 0\n",
            "encoding:\n  segment_size: 17\n",
            "encoding:\n  segment_size: 0\n",
            "transmit:\n  repeat_count: 0\n",
            "search:\n  max_attempts: 0\n",
            "source:\n  has_headers: false\n",
            "radio:\n  bogus: 1\n",
        ];
        for yaml in cases {
            assert!(TagalongConfig::from_yaml_str(yaml).is_err(), "accepted: {yaml}");
        }
    }

    #[test]
    fn timing_and_parameters_follow_radio_section() {
        let mut config = TagalongConfig::default();
        config.radio.settle_delay_ms = 250;
        config.radio.restart_delay_ms = 0;
        config.radio.interval_ms = 100;

        assert_eq!(config.radio_timing().settle_delay, Duration::from_millis(250));
        assert!(config.radio_timing().restart_delay.is_zero());
        assert_eq!(config.advertising_parameters().interval_units(), 160);
    }

    #[test]
    fn csv_source_needs_a_path() {
        let err = TagalongConfig::default().csv_source(None).unwrap_err();
        assert!(matches!(err, TagalongError::Config { .. }));
    }
}
