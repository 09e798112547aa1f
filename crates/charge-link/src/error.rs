//! Link errors surfaced to callers of `DeviceConnection` and `DeviceRegistry`

use charge_core::StationId;
use thiserror::Error;

use crate::codec::CodecError;
use crate::transport::TransportError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("Command queue full for station {0}")]
    Backpressure(StationId),

    #[error("Connection to station {0} is closed")]
    Closed(StationId),

    #[error("Station not found: {0}")]
    StationNotFound(StationId),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
