//! Transport layer for station links
//!
//! A [`Connector`] produces a fresh [`Link`] on every connect attempt:
//! - TCP stream (one read per frame)
//! - Connected UDP socket (one datagram per frame)
//! - Mock connector for testing
//!
//! # Example
//!
//! ```ignore
//! use charge_link::transport::create_connector;
//! use charge_link::TransportConfig;
//!
//! let connector = create_connector(&TransportConfig::udp("127.0.0.1", 8081))?;
//! let mut link = connector.connect().await?;
//! link.writer.write_frame(&frame).await?;
//! ```

mod adapter;
pub mod error;
pub mod mock;
pub mod tcp;
pub mod udp;

pub use adapter::{Connector, FrameReader, FrameWriter, Link, READ_BUFFER_SIZE};
pub use error::TransportError;

use std::sync::Arc;

use crate::config::TransportConfig;

/// Create a connector based on configuration
pub fn create_connector(config: &TransportConfig) -> Result<Arc<dyn Connector>, TransportError> {
    let endpoint = config.endpoint();
    if endpoint.host.trim().is_empty() {
        return Err(TransportError::InvalidConfig("empty host".to_string()));
    }
    if endpoint.port == 0 {
        return Err(TransportError::InvalidConfig(format!(
            "port 0 for host {}",
            endpoint.host
        )));
    }

    match config {
        TransportConfig::Tcp(cfg) => Ok(Arc::new(tcp::TcpConnector::new(cfg))),
        TransportConfig::Udp(cfg) => Ok(Arc::new(udp::UdpConnector::new(cfg))),
    }
}
