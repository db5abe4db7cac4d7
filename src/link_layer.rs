//! Raw LE 1M advertising packets.
//!
//! Software radios and backscatter tags have no controller to build the
//! link-layer packet for them, so [`build_frame`] produces the complete
//! on-air byte sequence for one advertising channel: preamble, access address,
//! then the whitened PDU and CRC. Only the PDU and CRC bytes are bit-reversed
//! for transceivers that shift MSB first; the preamble and access address are
//! written as-is.

use std::fmt;

use crate::advert::{ADDRESS_LEN, Advertisement, PAYLOAD_LEN};
use crate::{Result, TagalongError};

pub const PREAMBLE: u8 = 0xAA;

/// Advertising access address `0x8E89BED6`, least significant byte first.
pub const ACCESS_ADDRESS: [u8; 4] = [0xD6, 0xBE, 0x89, 0x8E];

/// ADV_NONCONN_IND with a random TxAdd.
pub const PDU_TYPE: u8 = 0x42;

/// Header, AdvA and advertising data.
pub const PDU_LEN: usize = 2 + ADDRESS_LEN + PAYLOAD_LEN;

pub const CRC_LEN: usize = 3;

/// Whitened portion of the packet.
pub const WHITENED_LEN: usize = PDU_LEN + CRC_LEN;

pub const FRAME_LEN: usize = 1 + ACCESS_ADDRESS.len() + WHITENED_LEN;

/// CRC initial value on advertising channels.
pub const ADVERTISING_CRC_INIT: u32 = 0x55_5555;

/// Advertising channel indices.
pub const ADVERTISING_CHANNELS: [u8; 3] = [37, 38, 39];

/// Reverse the 24 low bits.
fn reflect24(mut value: u32) -> u32 {
    let mut result = 0;
    for _ in 0..24 {
        result = (result << 1) | (value & 1);
        value >>= 1;
    }
    result
}

/// BLE CRC-24, polynomial x^24 + x^10 + x^9 + x^6 + x^4 + x^3 + x + 1.
///
/// Computed in reflected form over LSB-first data; the result's low byte is
/// transmitted first.
pub fn crc24(data: &[u8], init: u32) -> u32 {
    let mut crc = reflect24(init & 0xFF_FFFF);

    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xDA_6000;
            } else {
                crc >>= 1;
            }
        }
    }

    crc & 0xFF_FFFF
}

/// XOR `data` with the channel's whitening sequence.
///
/// Applying it twice restores the input.
pub fn whiten(data: &mut [u8], channel: u8) {
    let mut lfsr = channel.reverse_bits() | 0x02;

    for byte in data.iter_mut() {
        for bit in 0..8 {
            if lfsr & 0x80 != 0 {
                lfsr ^= 0x11;
                *byte ^= 1 << bit;
            }
            lfsr <<= 1;
        }
    }
}

/// One complete advertising packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LinkLayerFrame {
    channel: u8,
    bytes: [u8; FRAME_LEN],
}

impl LinkLayerFrame {
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Bytes as handed to an MSB-first transmitter.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// The whitened PDU and CRC, still bit-reversed.
    pub fn whitened(&self) -> &[u8] {
        &self.bytes[FRAME_LEN - WHITENED_LEN..]
    }

    /// Undo bit reversal and whitening, yielding PDU followed by CRC.
    pub fn dewhitened(&self) -> [u8; WHITENED_LEN] {
        let mut out = [0u8; WHITENED_LEN];
        for (dst, src) in out.iter_mut().zip(self.whitened()) {
            *dst = src.reverse_bits();
        }
        whiten(&mut out, self.channel);
        out
    }

    /// Whether the trailing CRC matches the PDU.
    pub fn crc_matches(&self) -> bool {
        let plain = self.dewhitened();
        let crc = crc24(&plain[..PDU_LEN], ADVERTISING_CRC_INIT).to_le_bytes();
        plain[PDU_LEN..] == crc[..CRC_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for LinkLayerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkLayerFrame")
            .field("channel", &self.channel)
            .field("bytes", &self.to_hex())
            .finish()
    }
}

/// Build the on-air packet for `advert` on advertising channel `channel`.
///
/// # Errors
///
/// Returns [`TagalongError::Config`] unless `channel` is 37, 38 or 39.
pub fn build_frame(advert: &Advertisement, channel: u8) -> Result<LinkLayerFrame> {
    if !ADVERTISING_CHANNELS.contains(&channel) {
        return Err(TagalongError::config(
            "link-layer channel",
            format!("{} is not an advertising channel (37..=39)", channel),
        ));
    }

    let mut body = [0u8; WHITENED_LEN];
    body[0] = PDU_TYPE;
    body[1] = (ADDRESS_LEN + PAYLOAD_LEN) as u8;
    body[2..2 + ADDRESS_LEN].copy_from_slice(&advert.address.wire_order());
    body[2 + ADDRESS_LEN..PDU_LEN].copy_from_slice(advert.payload.as_bytes());

    let crc = crc24(&body[..PDU_LEN], ADVERTISING_CRC_INIT).to_le_bytes();
    body[PDU_LEN..].copy_from_slice(&crc[..CRC_LEN]);

    whiten(&mut body, channel);

    let mut bytes = [0u8; FRAME_LEN];
    bytes[0] = PREAMBLE;
    bytes[1..5].copy_from_slice(&ACCESS_ADDRESS);
    for (dst, src) in bytes[5..].iter_mut().zip(body) {
        *dst = src.reverse_bits();
    }

    Ok(LinkLayerFrame { channel, bytes })
}

/// Frames for all three advertising channels.
pub fn build_frames(advert: &Advertisement) -> Result<Vec<LinkLayerFrame>> {
    ADVERTISING_CHANNELS.iter().map(|&channel| build_frame(advert, channel)).collect()
}
