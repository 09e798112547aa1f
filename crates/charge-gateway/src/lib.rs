//! charge-gateway - Application wiring
//!
//! Connects the station links from `charge-link` to the buses from
//! `charge-bus`, and both to an external message broker through the
//! [`MessageBridge`] boundary:
//!
//! ```text
//!  station ──frame──▶ DeviceConnection ──▶ StationPublisher ──▶ status bus ───────▶ bridge (status topic)
//!                                                           └─▶ connectivity bus ─▶ bridge (connectivity topic)
//!  bridge (command topic) ──▶ Gateway::handle_inbound ──▶ command bus ──▶ CommandRouter ──▶ send_command
//!  Gateway::request_tcp_status ──▶ reply bus ──▶ TcpStatusResponder
//! ```

pub mod bridge;
pub mod bus_manager;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod publisher;

pub use bridge::{parse_command_topic, BridgeSubscriber, LogBridge, MessageBridge};
pub use bus_manager::BusManager;
pub use config::{BridgeConfig, BusSettings, GatewayConfig, ReplySettings};
pub use error::GatewayError;
pub use gateway::Gateway;
pub use handlers::{CommandRouter, TcpStatusResponder};
pub use publisher::StationPublisher;
