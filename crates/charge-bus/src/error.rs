//! Bus errors

use std::fmt;

use thiserror::Error;

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors surfaced by [`EventBus`](crate::EventBus) and [`ReplyBus`](crate::ReplyBus)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Operation attempted after the bus was closed
    #[error("Bus closed")]
    Closed,

    /// A subscriber or middleware rejected the event
    #[error("Handler failed: {0}")]
    Handler(String),

    /// A subscriber panicked and the panic was caught by recovery middleware
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// No reply arrived before the request deadline
    #[error("Reply timeout")]
    Timeout,

    /// Reply for a correlation id that is unknown, already answered or expired
    #[error("No pending request for correlation id {0}")]
    NoSuchPending(String),

    /// The waiting side of a request went away before the reply could be delivered
    #[error("Reply delivery blocked for correlation id {0}")]
    DeliveryBlocked(String),
}

impl BusError {
    pub fn handler(msg: impl fmt::Display) -> Self {
        Self::Handler(msg.to_string())
    }

    /// Races between expiry and reply delivery are expected; these errors
    /// only need a debug log
    pub fn is_benign_race(&self) -> bool {
        matches!(self, Self::NoSuchPending(_) | Self::DeliveryBlocked(_))
    }
}
