//! Command frame encoding
//!
//! Two framings are supported:
//!
//! ```text
//! modbus: [station id][template ...][crc lo][crc hi]        CRC-16/MODBUS
//! can:    [00 00 08 00 00 0F 00][station id][payload x7][sum8]  16 bytes
//! ```

use std::collections::BTreeMap;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use charge_core::StationId;
use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid station id: {0}")]
    InvalidStationId(String),
}

/// Wire framing used by a station
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// Station id + template + CRC-16/MODBUS, little-endian
    #[default]
    Modbus,
    /// Fixed 16-byte CAN-over-IP frame with an 8-bit additive checksum
    Can,
}

const CAN_HEADER: [u8; 7] = [0x00, 0x00, 0x08, 0x00, 0x00, 0x0F, 0x00];
const CAN_FRAME_LEN: usize = CAN_HEADER.len() + 1 + 7 + 1;

fn modbus_templates() -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([
        ("start".to_string(), vec![0x05, 0x00, 0x07, 0xFF, 0x00]),
        ("stop".to_string(), vec![0x05, 0x00, 0x07, 0x00, 0x00]),
        ("read".to_string(), vec![0x01, 0x00, 0x40, 0x00]),
    ])
}

fn can_templates() -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([
        ("start".to_string(), vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]),
        ("stop".to_string(), vec![0x00; 7]),
    ])
}

/// Builds outbound command frames
///
/// Owns its CRC table and command templates; cheap to share behind an `Arc`
/// and pure apart from that.
pub struct CommandCodec {
    format: FrameFormat,
    crc: Crc<u16>,
    templates: BTreeMap<String, Vec<u8>>,
}

impl fmt::Debug for CommandCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandCodec")
            .field("format", &self.format)
            .field("commands", &self.templates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new(FrameFormat::default())
    }
}

impl CommandCodec {
    pub fn new(format: FrameFormat) -> Self {
        let templates = match format {
            FrameFormat::Modbus => modbus_templates(),
            FrameFormat::Can => can_templates(),
        };
        Self {
            format,
            crc: Crc::<u16>::new(&CRC_16_MODBUS),
            templates,
        }
    }

    pub fn modbus() -> Self {
        Self::new(FrameFormat::Modbus)
    }

    pub fn can() -> Self {
        Self::new(FrameFormat::Can)
    }

    /// Register or override a command template
    ///
    /// CAN payloads are padded or truncated to 7 bytes.
    pub fn with_template(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        let mut payload = payload.into();
        if self.format == FrameFormat::Can {
            payload.resize(7, 0);
        }
        self.templates.insert(name.into(), payload);
        self
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn supports(&self, command: &str) -> bool {
        self.templates.contains_key(command)
    }

    pub fn checksum(&self, data: &[u8]) -> u16 {
        self.crc.checksum(data)
    }

    /// Encode `command` for `station_id`
    ///
    /// Deterministic: the same inputs always yield the same bytes.
    pub fn encode(&self, station_id: &StationId, command: &str) -> Result<Bytes, CodecError> {
        let template = self
            .templates
            .get(command)
            .ok_or_else(|| CodecError::UnknownCommand(command.to_string()))?;
        let id = decode_station_id(station_id)?;

        match self.format {
            FrameFormat::Modbus => {
                let mut frame = BytesMut::with_capacity(id.len() + template.len() + 2);
                frame.put_slice(&id);
                frame.put_slice(template);
                let crc = self.checksum(&frame);
                frame.put_u16_le(crc);
                Ok(frame.freeze())
            }
            FrameFormat::Can => {
                let [id] = id[..] else {
                    return Err(CodecError::InvalidStationId(station_id.to_string()));
                };
                let mut frame = BytesMut::with_capacity(CAN_FRAME_LEN);
                frame.put_slice(&CAN_HEADER);
                frame.put_u8(id);
                frame.put_slice(template);
                let sum = sum8(&frame);
                frame.put_u8(sum);
                Ok(frame.freeze())
            }
        }
    }

    /// Check the trailer of a frame in this codec's format
    pub fn verify(&self, frame: &[u8]) -> bool {
        match self.format {
            FrameFormat::Modbus => {
                let Some(split) = frame.len().checked_sub(2).filter(|&n| n > 0) else {
                    return false;
                };
                let (body, trailer) = frame.split_at(split);
                self.checksum(body) == u16::from_le_bytes([trailer[0], trailer[1]])
            }
            FrameFormat::Can => {
                frame.len() == CAN_FRAME_LEN
                    && frame.starts_with(&CAN_HEADER)
                    && sum8(&frame[..CAN_FRAME_LEN - 1]) == frame[CAN_FRAME_LEN - 1]
            }
        }
    }
}

fn decode_station_id(station_id: &StationId) -> Result<Vec<u8>, CodecError> {
    let id = station_id.as_str();
    if id.is_empty() {
        return Err(CodecError::InvalidStationId(id.to_string()));
    }
    hex::decode(id).map_err(|_| CodecError::InvalidStationId(id.to_string()))
}

fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn encode_hex(codec: &CommandCodec, id: &str, cmd: &str) -> String {
        hex::encode_upper(codec.encode(&StationId::from(id), cmd).unwrap())
    }

    #[test]
    fn crc_matches_modbus_check_value() {
        assert_eq!(CommandCodec::modbus().checksum(b"123456789"), 0x4B37);
    }

    #[rstest]
    #[case("01", "start", "01050007FF003DFB")]
    #[case("01", "stop", "0105000700007C0B")]
    #[case("01", "read", "010100400029FC")]
    #[case("02", "start", "02050007FF003DC8")]
    #[case("02", "stop", "0205000700007C38")]
    #[case("02", "read", "02010040006DFC")]
    #[case("0A", "start", "0A050007FF003C80")]
    #[case("0a", "stop", "0A05000700007D70")]
    #[case("0A", "read", "0A010040008C3D")]
    fn modbus_frames(#[case] id: &str, #[case] cmd: &str, #[case] expected: &str) {
        let codec = CommandCodec::modbus();
        assert_eq!(encode_hex(&codec, id, cmd), expected);
    }

    #[rstest]
    #[case("start", "00000800000F00010000000000000119")]
    #[case("stop", "00000800000F00010000000000000018")]
    fn can_frames(#[case] cmd: &str, #[case] expected: &str) {
        let codec = CommandCodec::can();
        assert_eq!(encode_hex(&codec, "01", cmd), expected);
    }

    #[test]
    fn encoding_is_deterministic() {
        let codec = CommandCodec::modbus();
        let id = StationId::from("07");
        assert_eq!(
            codec.encode(&id, "start").unwrap(),
            codec.encode(&id, "start").unwrap()
        );
    }

    #[rstest]
    #[case(FrameFormat::Modbus, "unknown")]
    #[case(FrameFormat::Modbus, "START")]
    #[case(FrameFormat::Can, "read")]
    fn unknown_commands_rejected(#[case] format: FrameFormat, #[case] cmd: &str) {
        let err = CommandCodec::new(format)
            .encode(&StationId::from("01"), cmd)
            .unwrap_err();
        assert_eq!(err, CodecError::UnknownCommand(cmd.to_string()));
    }

    #[rstest]
    #[case(FrameFormat::Modbus, "")]
    #[case(FrameFormat::Modbus, "1")]
    #[case(FrameFormat::Modbus, "zz")]
    #[case(FrameFormat::Can, "0102")]
    fn invalid_station_ids_rejected(#[case] format: FrameFormat, #[case] id: &str) {
        let err = CommandCodec::new(format)
            .encode(&StationId::from(id), "start")
            .unwrap_err();
        assert_eq!(err, CodecError::InvalidStationId(id.to_string()));
    }

    #[test]
    fn verify_accepts_own_frames_and_rejects_corruption() {
        for codec in [CommandCodec::modbus(), CommandCodec::can()] {
            let frame = codec.encode(&StationId::from("01"), "start").unwrap();
            assert!(codec.verify(&frame), "{:?}", codec.format());

            let mut corrupted = frame.to_vec();
            corrupted[1] ^= 0x01;
            assert!(!codec.verify(&corrupted), "{:?}", codec.format());
        }
        assert!(!CommandCodec::modbus().verify(&[0x01, 0x02]));
    }

    #[test]
    fn custom_template() {
        let codec = CommandCodec::modbus().with_template("reset", vec![0x06, 0x00, 0x01]);
        assert!(codec.supports("reset"));
        assert!(codec.verify(&codec.encode(&StationId::from("01"), "reset").unwrap()));
        assert_eq!(codec.commands().collect::<Vec<_>>(), vec!["read", "reset", "start", "stop"]);
    }
}
