//! Message broker boundary
//!
//! The gateway does not link a broker client itself. Anything that can
//! publish a payload to a topic implements [`MessageBridge`]; inbound broker
//! messages are handed to [`Gateway::handle_inbound`](crate::Gateway::handle_inbound).

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use charge_bus::{BusError, BusResult, Event, Subscriber};
use charge_core::StationId;
use serde::Serialize;
use tracing::info;

use crate::error::GatewayError;

/// Outbound side of a message broker
#[async_trait]
pub trait MessageBridge: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError>;
}

/// Bridge that only logs what would be published
#[derive(Debug, Clone, Default)]
pub struct LogBridge;

#[async_trait]
impl MessageBridge for LogBridge {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        info!(topic, payload = %String::from_utf8_lossy(&payload), "Publish");
        Ok(())
    }
}

/// Serialises every event on a bus to JSON and publishes it to one topic
pub struct BridgeSubscriber<T> {
    bridge: Arc<dyn MessageBridge>,
    topic: String,
    _event: PhantomData<fn(&T)>,
}

impl<T> BridgeSubscriber<T> {
    pub fn new(bridge: Arc<dyn MessageBridge>, topic: impl Into<String>) -> Self {
        Self {
            bridge,
            topic: topic.into(),
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<T> Subscriber<T> for BridgeSubscriber<T>
where
    T: Event + Serialize,
{
    async fn handle(&self, event: &T) -> BusResult<()> {
        let payload = serde_json::to_vec(event).map_err(BusError::handler)?;
        self.bridge
            .publish(&self.topic, payload)
            .await
            .map_err(BusError::handler)
    }
}

/// Station id captured by the `+` segment of `pattern`
///
/// ```
/// use charge_gateway::parse_command_topic;
///
/// let id = parse_command_topic("charge_station/+/command", "charge_station/01/command");
/// assert_eq!(id.unwrap().as_str(), "01");
/// assert!(parse_command_topic("charge_station/+/command", "charge_station/01/status").is_none());
/// ```
pub fn parse_command_topic(pattern: &str, topic: &str) -> Option<StationId> {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');
    let mut station = None;

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (None, None) => return station,
            (Some("+"), Some(segment)) if !segment.is_empty() => {
                station = Some(StationId::from(segment));
            }
            (Some(expected), Some(segment)) if expected == segment => {}
            _ => return None,
        }
    }
}
