//! Connector and link traits

use async_trait::async_trait;
use bytes::Bytes;

use super::TransportError;

/// Bytes requested per read; one read is treated as one frame
pub const READ_BUFFER_SIZE: usize = 1024;

/// Receiving half of a link
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next inbound frame
    ///
    /// Any error means the link is gone.
    async fn read_frame(&mut self) -> Result<Bytes, TransportError>;
}

/// Sending half of a link
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Best-effort orderly close
    async fn shutdown(&mut self) {}
}

/// One established session with a station
///
/// Dropping both halves releases the underlying socket.
pub struct Link {
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
    /// Remote address as seen by the socket
    pub peer: String,
}

/// Transport-agnostic way to (re)establish a link to one station
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, TransportError>;

    /// Configured remote address, for logging
    fn address(&self) -> String;
}
