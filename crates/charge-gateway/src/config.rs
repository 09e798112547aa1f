//! Gateway configuration
//!
//! Loaded from TOML or YAML, chosen by file extension:
//!
//! ```toml
//! [bus]
//! queue_capacity = 2000
//!
//! [reply]
//! sweep_interval_ms = 5000
//!
//! [bridge]
//! status_topic = "charge_station/status"
//!
//! [[stations]]
//! id = "01"
//! [stations.transport]
//! type = "udp"
//! host = "127.0.0.1"
//! port = 8081
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use charge_bus::{BusConfig, ReplyConfig};
use charge_link::{CodecError, CommandCodec, StationConfig};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub reply: ReplySettings,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

impl GatewayConfig {
    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("toml")
            .to_ascii_lowercase();

        match ext.as_str() {
            "toml" => Self::from_toml_str(&content),
            "yaml" | "yml" => Self::from_yaml_str(&content),
            other => Err(GatewayError::Config(format!(
                "unsupported config format '.{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, GatewayError> {
        let config: Self =
            toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, GatewayError> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate or malformed station ids and unusable topics
    pub fn validate(&self) -> Result<(), GatewayError> {
        let mut seen = HashSet::new();
        for station in &self.stations {
            if !seen.insert(station.id.clone()) {
                return Err(GatewayError::Config(format!(
                    "duplicate station id '{}'",
                    station.id
                )));
            }

            let codec = CommandCodec::new(station.frame_format);
            if let Err(CodecError::InvalidStationId(id)) = codec.encode(&station.id, "start") {
                return Err(GatewayError::Config(format!(
                    "station id '{}' is not valid for {:?} framing",
                    id, station.frame_format
                )));
            }
        }

        let wildcards = self.bridge.command_topic.split('/').filter(|s| *s == "+").count();
        if wildcards != 1 {
            return Err(GatewayError::Config(format!(
                "command topic '{}' must contain exactly one '+' segment",
                self.bridge.command_topic
            )));
        }
        Ok(())
    }
}

/// Event bus sizing; unset fields follow hardware parallelism
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_interval_ms: Option<u64>,
}

impl BusSettings {
    pub fn to_bus_config(&self) -> BusConfig {
        let defaults = BusConfig::default();
        let min = self.min_workers.unwrap_or(defaults.min_workers);
        let initial = self.initial_workers.unwrap_or(defaults.initial_workers);
        let max = self.max_workers.unwrap_or(defaults.max_workers);

        let mut config = defaults.with_workers(min, initial, max);
        if let Some(capacity) = self.queue_capacity {
            config = config.with_queue_capacity(capacity);
        }
        if let Some(ms) = self.scale_interval_ms {
            config = config.with_scale_interval(Duration::from_millis(ms));
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySettings {
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    5000
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl ReplySettings {
    pub fn to_reply_config(&self, bus: BusConfig) -> ReplyConfig {
        ReplyConfig {
            sweep_interval: Duration::from_millis(self.sweep_interval_ms.max(1)),
            bus,
        }
    }
}

/// Broker topics used by the message bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    #[serde(default = "default_connectivity_topic")]
    pub connectivity_topic: String,
    /// Inbound command topic; the `+` segment is the station id
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
}

fn default_status_topic() -> String {
    "charge_station/status".to_string()
}

fn default_connectivity_topic() -> String {
    "charge_station/connectivity".to_string()
}

fn default_command_topic() -> String {
    "charge_station/+/command".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            status_topic: default_status_topic(),
            connectivity_topic: default_connectivity_topic(),
            command_topic: default_command_topic(),
        }
    }
}
