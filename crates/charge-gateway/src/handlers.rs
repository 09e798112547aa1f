//! Bus subscribers that act on station links

use std::sync::Arc;

use async_trait::async_trait;
use charge_bus::{BusError, BusResult, ReplyBus, Subscriber};
use charge_core::{Command, ConnectionStatus, TcpStatusRequest};
use charge_link::{ConnectionState, DeviceRegistry, LinkError};
use tracing::debug;

/// Forwards `Command` events to the addressed station
pub struct CommandRouter {
    registry: Arc<DeviceRegistry>,
}

impl CommandRouter {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Subscriber<Command> for CommandRouter {
    async fn handle(&self, event: &Command) -> BusResult<()> {
        let connection = self
            .registry
            .get(event.station_id.as_str())
            .ok_or_else(|| BusError::handler(LinkError::StationNotFound(event.station_id.clone())))?;

        connection.send_command(&event.cmd).map_err(BusError::handler)?;
        debug!(station_id = %event.station_id, cmd = %event.cmd, "Command routed");
        Ok(())
    }
}

/// Answers `TcpStatusRequest`s from the registry
pub struct TcpStatusResponder {
    registry: Arc<DeviceRegistry>,
}

impl TcpStatusResponder {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub fn answer(&self, request: &TcpStatusRequest) -> ConnectionStatus {
        let station_id = request.station_id.clone();
        match self.registry.get(station_id.as_str()) {
            None => ConnectionStatus::disconnected(station_id, "station not configured"),
            Some(connection) => match connection.state() {
                ConnectionState::Connected => ConnectionStatus::connected(station_id),
                state => ConnectionStatus::disconnected(
                    station_id,
                    format!("{:?}", state).to_lowercase(),
                ),
            },
        }
    }

    /// Subscribe as the responder of `bus`
    pub fn install(self, bus: &ReplyBus<TcpStatusRequest, ConnectionStatus>) {
        bus.respond_with(move |request| self.answer(request));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charge_link::transport::mock::mock_pair;
    use charge_link::{CommandCodec, ConnectionOptions, NoopObserver};
    use charge_core::StationId;
    use std::time::Duration;

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(Arc::new(NoopObserver)))
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            retry_delay: Duration::from_millis(50),
            queue_capacity: 4,
            poll_interval: None,
        }
    }

    #[tokio::test]
    async fn router_rejects_unknown_station() {
        let router = CommandRouter::new(registry());
        let err = router.handle(&Command::new("09", "start")).await.unwrap_err();
        assert_eq!(err, BusError::Handler("Station not found: 09".to_string()));
    }

    #[tokio::test]
    async fn router_queues_command_on_station() {
        let registry = registry();
        let (connector, controller) = mock_pair("mock:01");
        let conn = registry.add_with_connector(
            StationId::from("01"),
            Arc::new(connector),
            CommandCodec::modbus(),
            options(),
        );
        let router = CommandRouter::new(registry.clone());

        router.handle(&Command::new("01", "start")).await.unwrap();
        assert_eq!(conn.queued(), 1);

        assert!(matches!(
            router.handle(&Command::new("01", "bogus")).await,
            Err(BusError::Handler(_))
        ));

        drop(controller);
        registry.close_all().await;
    }

    #[tokio::test]
    async fn responder_reports_link_state() {
        let registry = registry();
        let (connector, controller) = mock_pair("mock:01");
        let conn = registry.add_with_connector(
            StationId::from("01"),
            Arc::new(connector),
            CommandCodec::modbus(),
            options(),
        );
        let responder = TcpStatusResponder::new(registry.clone());

        let status = responder.answer(&TcpStatusRequest::new("01"));
        assert!(!status.is_connect);
        assert_eq!(status.msg, "connecting");

        let _peer = controller.accept();
        conn.wait_until_ready().await.unwrap();
        assert!(responder.answer(&TcpStatusRequest::new("01")).is_connect);

        let unknown = responder.answer(&TcpStatusRequest::new("7F"));
        assert!(!unknown.is_connect);
        assert_eq!(unknown.msg, "station not configured");

        registry.close_all().await;
    }
}
