//! The gateway's event buses

use charge_bus::{BusConfig, EventBus, LogMiddleware, RecoveryMiddleware, ReplyBus, ReplyConfig};
use charge_core::{Command, ConnectionStatus, StationStatus, TcpStatusRequest};
use tracing::info;

/// Owns one bus per event kind
#[derive(Clone)]
pub struct BusManager {
    /// Decoded station status frames
    pub status: EventBus<StationStatus>,
    /// Link up/down transitions
    pub connectivity: EventBus<ConnectionStatus>,
    /// Commands addressed to stations
    pub command: EventBus<Command>,
    /// Live connection state queries
    pub tcp_status: ReplyBus<TcpStatusRequest, ConnectionStatus>,
}

impl BusManager {
    pub fn new(bus: BusConfig, reply: ReplyConfig) -> Self {
        Self {
            status: EventBus::with_config("station_status", bus.clone()),
            connectivity: EventBus::with_config("connectivity", bus.clone()),
            command: EventBus::with_config("command", bus),
            tcp_status: ReplyBus::with_config("tcp_status", reply),
        }
    }

    /// Install logging (outermost) and panic recovery on every bus
    pub fn register_middlewares(&self) {
        self.status.use_middleware(LogMiddleware::new("station_status"));
        self.status.use_middleware(RecoveryMiddleware);
        self.connectivity.use_middleware(LogMiddleware::new("connectivity"));
        self.connectivity.use_middleware(RecoveryMiddleware);
        self.command.use_middleware(LogMiddleware::new("command"));
        self.command.use_middleware(RecoveryMiddleware);
        self.tcp_status.use_middleware(LogMiddleware::new("tcp_status"));
        self.tcp_status.use_middleware(RecoveryMiddleware);
    }

    /// Close producers first, then the buses they feed
    pub async fn close(&self) {
        self.command.close().await;
        self.tcp_status.close().await;
        self.status.close().await;
        self.connectivity.close().await;
        info!("All buses closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> BusManager {
        let bus = BusConfig::default().with_workers(1, 1, 2);
        BusManager::new(
            bus.clone(),
            ReplyConfig {
                bus,
                ..ReplyConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn middlewares_installed_on_every_bus() {
        let buses = small();
        buses.register_middlewares();

        assert_eq!(buses.status.stats().middlewares, 2);
        assert_eq!(buses.connectivity.stats().middlewares, 2);
        assert_eq!(buses.command.stats().middlewares, 2);
        assert_eq!(buses.tcp_status.bus().stats().middlewares, 2);
        buses.close().await;
    }

    #[tokio::test]
    async fn close_shuts_every_bus() {
        let buses = small();
        buses.close().await;

        assert!(buses.status.is_closed());
        assert!(buses.connectivity.is_closed());
        assert!(buses.command.is_closed());
        assert!(buses.tcp_status.is_closed());
    }
}
