//! Inbound status frames
//!
//! ```text
//! byte:  0     1  2   3        4       5       6..
//!        [id]  [reserved] [status] [error] [other] [ignored]
//! ```

use charge_core::{StationId, StationStatus};
use thiserror::Error;

pub const STATUS_FRAME_MIN_LEN: usize = 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Status frame too short: {len} bytes, need at least 6")]
    TooShort { len: usize },
}

/// Decode the status fields of an inbound frame
pub fn decode_status(frame: &[u8]) -> Result<StationStatus, PacketError> {
    if frame.len() < STATUS_FRAME_MIN_LEN {
        return Err(PacketError::TooShort { len: frame.len() });
    }
    Ok(StationStatus::new(
        StationId::from_byte(frame[0]),
        frame[3],
        frame[4],
        frame[5],
    ))
}

/// Build the minimal status frame a station sends
pub fn encode_status(station: u8, status: u8, error: u8, other: u8) -> [u8; STATUS_FRAME_MIN_LEN] {
    [station, 0x00, 0x00, status, error, other]
}
