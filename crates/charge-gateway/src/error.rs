//! Gateway errors

use charge_bus::BusError;
use charge_core::StationId;
use charge_link::LinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Stations not ready: {}", join_ids(.0))]
    NotReady(Vec<StationId>),
}

fn join_ids(ids: &[StationId]) -> String {
    ids.iter()
        .map(StationId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
