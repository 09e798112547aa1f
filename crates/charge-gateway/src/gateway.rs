//! Gateway facade

use std::sync::Arc;
use std::time::Duration;

use charge_core::{Command, ConnectionStatus, StationId, TcpStatusRequest};
use charge_link::DeviceRegistry;
use futures::future::join_all;
use tracing::{info, warn};

use crate::bridge::{parse_command_topic, BridgeSubscriber, MessageBridge};
use crate::bus_manager::BusManager;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::handlers::{CommandRouter, TcpStatusResponder};
use crate::publisher::StationPublisher;

/// Running gateway: buses, station links and bridge subscriptions
pub struct Gateway {
    config: GatewayConfig,
    buses: BusManager,
    registry: Arc<DeviceRegistry>,
}

impl Gateway {
    /// Build everything and open every configured station
    ///
    /// Returns without waiting for any station to connect.
    pub fn start(
        config: GatewayConfig,
        bridge: Arc<dyn MessageBridge>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let bus_config = config.bus.to_bus_config();
        let buses = BusManager::new(
            bus_config.clone(),
            config.reply.to_reply_config(bus_config),
        );
        buses.register_middlewares();

        let registry = Arc::new(DeviceRegistry::new(Arc::new(StationPublisher::new(&buses))));

        buses.command.subscribe(CommandRouter::new(registry.clone()));
        TcpStatusResponder::new(registry.clone()).install(&buses.tcp_status);
        buses.status.subscribe(BridgeSubscriber::new(
            bridge.clone(),
            config.bridge.status_topic.clone(),
        ));
        buses.connectivity.subscribe(BridgeSubscriber::new(
            bridge,
            config.bridge.connectivity_topic.clone(),
        ));

        for station in &config.stations {
            registry.add(station)?;
        }

        info!(stations = config.stations.len(), "Gateway started");
        Ok(Self {
            config,
            buses,
            registry,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn buses(&self) -> &BusManager {
        &self.buses
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Wait until every station has connected at least once
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), GatewayError> {
        let connections = self.registry.get_all();
        let waits = join_all(connections.values().map(|c| c.wait_until_ready()));

        match tokio::time::timeout(timeout, waits).await {
            Ok(results) => {
                for result in results {
                    result?;
                }
                info!(stations = connections.len(), "All stations ready");
                Ok(())
            }
            Err(_) => {
                let mut pending: Vec<StationId> = connections
                    .iter()
                    .filter(|(_, c)| c.ready_signals() == 0)
                    .map(|(id, _)| id.clone())
                    .collect();
                pending.sort();
                Err(GatewayError::NotReady(pending))
            }
        }
    }

    /// Route a command to a station through the command bus
    pub async fn send_command(
        &self,
        station_id: impl Into<StationId>,
        cmd: impl Into<String>,
    ) -> Result<(), GatewayError> {
        let command = Command::new(station_id, cmd);
        self.buses.command.publish_sync(&command).await?;
        Ok(())
    }

    /// Turn an inbound broker message into a command
    ///
    /// The topic carries the station id, the payload the command name.
    pub async fn handle_inbound(&self, topic: &str, payload: &[u8]) -> Result<(), GatewayError> {
        let station_id = parse_command_topic(&self.config.bridge.command_topic, topic)
            .ok_or_else(|| GatewayError::Bridge(format!("unexpected topic '{}'", topic)))?;
        let cmd = std::str::from_utf8(payload)
            .map_err(|_| GatewayError::Bridge(format!("non UTF-8 payload on '{}'", topic)))?
            .trim();
        if cmd.is_empty() {
            return Err(GatewayError::Bridge(format!("empty command on '{}'", topic)));
        }

        info!(%station_id, cmd, "Inbound command");
        let result = self.send_command(station_id.clone(), cmd).await;
        if let Err(e) = &result {
            warn!(%station_id, cmd, error = %e, "Inbound command rejected");
        }
        result
    }

    /// Ask the reply bus for the live link state of a station
    pub async fn request_tcp_status(
        &self,
        station_id: impl Into<StationId>,
        timeout: Duration,
    ) -> Result<ConnectionStatus, GatewayError> {
        let status = self
            .buses
            .tcp_status
            .request_and_wait(TcpStatusRequest::new(station_id), timeout)
            .await?;
        Ok(status)
    }

    /// Close every station link, then every bus
    pub async fn shutdown(&self) {
        info!("Shutting down gateway");
        self.registry.close_all().await;
        self.buses.close().await;
        info!("Gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use charge_link::transport::mock::{mock_pair, MockController};
    use charge_link::{encode_status, CommandCodec, ConnectionOptions, LinkError};
    use charge_bus::BusError;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    struct ChannelBridge(mpsc::UnboundedSender<(String, serde_json::Value)>);

    #[async_trait]
    impl MessageBridge for ChannelBridge {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
            let json = serde_json::from_slice(&payload)
                .map_err(|e| GatewayError::Bridge(e.to_string()))?;
            let _ = self.0.send((topic.to_string(), json));
            Ok(())
        }
    }

    fn test_config() -> GatewayConfig {
        GatewayConfig::from_toml_str(
            r#"
            [bus]
            min_workers = 1
            initial_workers = 2
            max_workers = 4
            "#,
        )
        .unwrap()
    }

    fn start() -> (Gateway, mpsc::UnboundedReceiver<(String, serde_json::Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Gateway::start(test_config(), Arc::new(ChannelBridge(tx))).unwrap();
        (gateway, rx)
    }

    fn add_station(gateway: &Gateway, id: &str) -> MockController {
        let (connector, controller) = mock_pair(format!("mock:{id}"));
        gateway.registry().add_with_connector(
            StationId::from(id),
            Arc::new(connector),
            CommandCodec::modbus(),
            ConnectionOptions {
                retry_delay: Duration::from_millis(50),
                queue_capacity: 8,
                poll_interval: None,
            },
        );
        controller
    }

    async fn next_on(
        rx: &mut mpsc::UnboundedReceiver<(String, serde_json::Value)>,
        topic: &str,
    ) -> serde_json::Value {
        loop {
            let (t, json) = tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("nothing published")
                .expect("bridge closed");
            if t == topic {
                return json;
            }
        }
    }

    #[tokio::test]
    async fn inbound_command_reaches_station() {
        let (gateway, _rx) = start();
        let controller = add_station(&gateway, "01");
        let mut peer = controller.accept();
        gateway.wait_until_ready(WAIT).await.unwrap();

        gateway
            .handle_inbound("charge_station/01/command", b" start\n")
            .await
            .unwrap();

        let frame = peer.recv_timeout(WAIT).await.unwrap();
        assert_eq!(&frame[..], &[0x01, 0x05, 0x00, 0x07, 0xFF, 0x00, 0x3D, 0xFB]);
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn inbound_errors_are_reported() {
        let (gateway, _rx) = start();
        let _controller = add_station(&gateway, "01");

        assert!(matches!(
            gateway.handle_inbound("charge_station/status", b"start").await,
            Err(GatewayError::Bridge(_))
        ));
        assert!(matches!(
            gateway.handle_inbound("charge_station/01/command", b"  ").await,
            Err(GatewayError::Bridge(_))
        ));

        let err = gateway
            .handle_inbound("charge_station/09/command", b"start")
            .await
            .unwrap_err();
        match err {
            GatewayError::Bus(BusError::Handler(msg)) => {
                assert_eq!(msg, LinkError::StationNotFound(StationId::from("09")).to_string())
            }
            other => panic!("unexpected error: {other}"),
        }
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn status_and_connectivity_reach_bridge() {
        let (gateway, mut rx) = start();
        let controller = add_station(&gateway, "01");
        let peer = controller.accept();

        let up = next_on(&mut rx, "charge_station/connectivity").await;
        assert_eq!(up["stationId"], "01");
        assert_eq!(up["isConnect"], true);

        peer.send(encode_status(0x01, 0b0000_0001, 0, 0b0000_0100).to_vec());
        let status = next_on(&mut rx, "charge_station/status").await;
        assert_eq!(status["stationId"], "01");
        assert_eq!(status["status"], "00000001");
        assert_eq!(status["other"], "00000100");

        peer.fail("cable pulled");
        let down = next_on(&mut rx, "charge_station/connectivity").await;
        assert_eq!(down["isConnect"], false);
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn tcp_status_request_round_trip() {
        let (gateway, _rx) = start();
        let controller = add_station(&gateway, "01");

        let status = gateway.request_tcp_status("01", WAIT).await.unwrap();
        assert!(!status.is_connect);

        let _peer = controller.accept();
        gateway.wait_until_ready(WAIT).await.unwrap();
        let status = gateway.request_tcp_status("01", WAIT).await.unwrap();
        assert!(status.is_connect);
        assert_eq!(status.station_id.as_str(), "01");

        let unknown = gateway.request_tcp_status("0F", WAIT).await.unwrap();
        assert_eq!(unknown.msg, "station not configured");
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn wait_until_ready_names_missing_stations() {
        let (gateway, _rx) = start();
        let first = add_station(&gateway, "01");
        let _second = add_station(&gateway, "02");
        let _peer = first.accept();

        match gateway.wait_until_ready(Duration::from_millis(200)).await {
            Err(GatewayError::NotReady(ids)) => assert_eq!(ids, vec![StationId::from("02")]),
            other => panic!("unexpected: {other:?}"),
        }
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_links_and_buses() {
        let (gateway, _rx) = start();
        let controller = add_station(&gateway, "01");
        let mut peer = controller.accept();
        gateway.wait_until_ready(WAIT).await.unwrap();

        gateway.shutdown().await;

        assert!(gateway.registry().is_empty());
        assert!(peer.recv_timeout(WAIT).await.is_none());
        assert!(matches!(
            gateway.send_command("01", "start").await,
            Err(GatewayError::Bus(BusError::Closed))
        ));
    }
}
