//! Link event sink

use charge_core::{ConnectionStatus, StationStatus};

/// Receives what a [`DeviceConnection`](crate::DeviceConnection) learns
///
/// Called from the connection's own tasks, so implementations must not
/// block; hand the event off (for example via `EventBus::publish_async`).
pub trait LinkObserver: Send + Sync {
    /// A status frame was decoded
    fn on_status(&self, status: StationStatus);

    /// The link came up or went down
    fn on_connection_change(&self, status: ConnectionStatus);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LinkObserver for NoopObserver {
    fn on_status(&self, _status: StationStatus) {}

    fn on_connection_change(&self, _status: ConnectionStatus) {}
}
