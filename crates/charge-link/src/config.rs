//! Station link configuration

use std::time::Duration;

use charge_core::StationId;
use serde::{Deserialize, Serialize};

use crate::codec::FrameFormat;

/// One configured station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: StationId,
    pub transport: TransportConfig,
    #[serde(default)]
    pub frame_format: FrameFormat,
    /// Delay between failed connect attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Outbound command queue bound
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Status poll period while connected, 0 disables polling
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_queue_capacity() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl StationConfig {
    pub fn new(id: impl Into<StationId>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            transport,
            frame_format: FrameFormat::default(),
            retry_delay_ms: default_retry_delay_ms(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            queue_capacity: self.queue_capacity.max(1),
            poll_interval: (self.poll_interval_ms > 0)
                .then(|| Duration::from_millis(self.poll_interval_ms)),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// How the station is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Connected UDP socket, one datagram per frame
    Udp(EndpointConfig),
    /// TCP stream, one read per frame
    Tcp(EndpointConfig),
}

impl TransportConfig {
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::Udp(EndpointConfig::new(host, port))
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp(EndpointConfig::new(host, port))
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        match self {
            Self::Udp(endpoint) | Self::Tcp(endpoint) => endpoint,
        }
    }

    /// `host:port` of the station
    pub fn address(&self) -> String {
        self.endpoint().address()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    /// Connect timeout (only meaningful for TCP)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Runtime knobs for a [`DeviceConnection`](crate::DeviceConnection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub retry_delay: Duration,
    pub queue_capacity: usize,
    pub poll_interval: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(3),
            queue_capacity: 100,
            poll_interval: Some(Duration::from_secs(2)),
        }
    }
}
