//! End-to-end transmission against a recording radio.
//!
//! Runs the real P-224 search, so every broadcast key must lie on the curve.

use std::path::PathBuf;

use tagalong::advert::{ADDRESS_LEN, PAYLOAD_LEN};
use tagalong::curve::is_valid_compressed_point;
use tagalong::radio::{ADVERTISING_DATA_LEN, ADVERTISING_PARAMETERS_LEN};
use tagalong::{
    Column, CsvRowSource, MemoryCheckpointStore, RadioDriver, Result, Tagalong, TagalongConfig,
};

#[derive(Debug, Default)]
struct Recorder {
    addresses: Vec<[u8; ADDRESS_LEN]>,
    data: Vec<[u8; ADVERTISING_DATA_LEN]>,
    parameters: Vec<[u8; ADVERTISING_PARAMETERS_LEN]>,
    enables: usize,
}

impl Recorder {
    /// Keys recovered from the broadcast address and payload pairs.
    fn keys(&self) -> Vec<[u8; 28]> {
        self.addresses
            .iter()
            .zip(&self.data)
            .map(|(wire_address, data)| {
                let payload = &data[1..];
                let mut key = [0u8; 28];
                for (i, byte) in wire_address.iter().rev().enumerate() {
                    key[i] = *byte;
                }
                key[0] = (key[0] & 0x3F) | (payload[29] << 6);
                key[6..].copy_from_slice(&payload[7..29]);
                key
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RadioDriver for Recorder {
    async fn set_random_address(&mut self, address: &[u8; ADDRESS_LEN]) -> Result<()> {
        self.addresses.push(*address);
        Ok(())
    }

    async fn set_advertising_data(&mut self, data: &[u8; ADVERTISING_DATA_LEN]) -> Result<()> {
        self.data.push(*data);
        Ok(())
    }

    async fn set_advertising_parameters(
        &mut self,
        parameters: &[u8; ADVERTISING_PARAMETERS_LEN],
    ) -> Result<()> {
        self.parameters.push(*parameters);
        Ok(())
    }

    async fn set_advertising_enable(&mut self, _enable: &[u8; 1]) -> Result<()> {
        self.enables += 1;
        Ok(())
    }
}

fn fast_config() -> TagalongConfig {
    let mut config = TagalongConfig::default();
    config.transmit.repeat_count = 1;
    config.transmit.key_delay_ms = 0;
    config.radio.settle_delay_ms = 0;
    config.radio.restart_delay_ms = 0;
    config
}

fn on_curve(key: &[u8; 28]) -> bool {
    let mut point = [0u8; 29];
    point[0] = 0x02;
    point[1..].copy_from_slice(key);
    is_valid_compressed_point(&point)
}

#[tokio::test]
async fn abc_reaches_the_radio_as_three_valid_keys() {
    let mut config = fast_config();
    config.message_ids.first = 1;
    let mut transmitter = Tagalong::transmitter(&config, Recorder::default());
    let report = transmitter.send_payload(b"ABC").await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.message_ids, vec![1]);
    assert_eq!(report.keys_broadcast, 3);

    let recorder = transmitter.sequencer().driver();
    assert_eq!(recorder.enables, 3);
    assert!(recorder.data.iter().all(|d| d[0] as usize == PAYLOAD_LEN));
    assert!(recorder.data.iter().all(|d| d[1..8] == [0x1e, 0xff, 0x4c, 0x00, 0x12, 0x19, 0x00]));
    assert!(recorder.addresses.iter().all(|a| a[ADDRESS_LEN - 1] & 0xC0 == 0xC0));

    let keys = recorder.keys();
    assert_eq!(keys.len(), 3);
    for key in &keys {
        assert_eq!(&key[..6], &[0xBA, 0xBE, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&key[8..12], &[0, 0, 0, 1]);
        assert!(on_curve(key));
    }
    assert_eq!(key_tail(&keys[0], 1), &[0x41]);
    assert_eq!(key_tail(&keys[1], 2), &[0x42, 0x41]);
    assert_eq!(key_tail(&keys[2], 3), &[0x43, 0x42, 0x41]);
    assert!(keys[2][12..25].iter().all(|&b| b == 0));
}

fn key_tail(key: &[u8; 28], len: usize) -> &[u8] {
    &key[28 - len..]
}

#[tokio::test]
async fn long_payload_uses_consecutive_message_ids() {
    let mut config = fast_config();
    config.message_ids.first = 7;
    let mut transmitter = Tagalong::transmitter(&config, Recorder::default());

    let payload: Vec<u8> = (0u8..40).collect();
    let report = transmitter.send_payload(&payload).await.unwrap();

    assert_eq!(report.message_ids, vec![7, 8, 9]);
    assert_eq!(report.keys_broadcast, 40);
    assert_eq!(transmitter.next_message_id(), 10);

    let keys = transmitter.sequencer().driver().keys();
    let ids: Vec<u32> =
        keys.iter().map(|k| u32::from_be_bytes([k[8], k[9], k[10], k[11]])).collect();
    assert_eq!(ids.iter().filter(|&&id| id == 7).count(), 16);
    assert_eq!(ids.iter().filter(|&&id| id == 9).count(), 8);

    // The last key of the first segment holds it reversed.
    let expected: Vec<u8> = (0u8..16).rev().collect();
    assert_eq!(&keys[15][12..], expected.as_slice());
}

struct TempCsv(PathBuf);

impl TempCsv {
    fn new(name: &str, contents: &str) -> Self {
        let path = std::env::temp_dir()
            .join(format!("tagalong-pipeline-{}-{}.csv", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        Self(path)
    }

    fn open(&self) -> CsvRowSource {
        CsvRowSource::open(
            &self.0,
            &Column::Name("Timestamp".to_string()),
            &Column::Name("Data_2".to_string()),
            true,
        )
        .unwrap()
    }
}

impl Drop for TempCsv {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[tokio::test]
async fn csv_rows_are_sent_once_across_runs() {
    let csv = TempCsv::new(
        "resume",
        "Timestamp,Data_1,Data_2\n1693380000.5,x,hi\n1693380001.5,y,yo\n",
    );
    let checkpoint = MemoryCheckpointStore::new();

    let mut transmitter = Tagalong::transmitter(&fast_config(), Recorder::default());
    let report = transmitter.run(&mut csv.open(), &mut checkpoint.clone()).await.unwrap();
    assert_eq!(report.rows_sent, 2);
    assert_eq!(report.keys_broadcast, 4);
    assert_eq!(report.next_message_id, 2);
    assert_eq!(checkpoint.get(), Some(1693380001.5));

    let mut again = Tagalong::transmitter(&fast_config(), Recorder::default());
    let report = again.run(&mut csv.open(), &mut checkpoint.clone()).await.unwrap();
    assert_eq!(report.rows_skipped, 2);
    assert_eq!(report.rows_sent, 0);
    assert_eq!(report.keys_broadcast, 0);
    assert!(again.sequencer().driver().addresses.is_empty());
    assert_eq!(checkpoint.get(), Some(1693380001.5));
}
