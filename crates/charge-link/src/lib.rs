//! charge-link - Device links to charging-station controllers
//!
//! - [`CommandCodec`]: symbolic command -> checksummed wire frame
//! - [`decode_status`]: inbound status frame -> [`StationStatus`](charge_core::StationStatus)
//! - [`transport`]: TCP, UDP and mock connectors producing framed links
//! - [`DeviceConnection`]: supervisor task that keeps one station link alive
//!   and drains its outbound command queue
//! - [`DeviceRegistry`]: station id -> connection map

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod observer;
pub mod packet;
pub mod registry;
pub mod transport;

pub use codec::{CodecError, CommandCodec, FrameFormat};
pub use config::{ConnectionOptions, EndpointConfig, StationConfig, TransportConfig};
pub use connection::{ConnectionState, DeviceConnection};
pub use error::LinkError;
pub use observer::{LinkObserver, NoopObserver};
pub use packet::{decode_status, encode_status, PacketError, STATUS_FRAME_MIN_LEN};
pub use registry::DeviceRegistry;
pub use transport::{create_connector, Connector, Link, TransportError};
