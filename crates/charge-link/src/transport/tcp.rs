//! TCP transport

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::{Connector, FrameReader, FrameWriter, Link, TransportError, READ_BUFFER_SIZE};
use crate::config::EndpointConfig;

pub struct TcpConnector {
    endpoint: EndpointConfig,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(config: &EndpointConfig) -> Self {
        Self {
            endpoint: config.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout(format!("connect to {}", self.address())))?
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.address(), e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.address());
        let (read, write) = stream.into_split();

        Ok(Link {
            reader: Box::new(TcpFrameReader {
                half: read,
                buf: vec![0; READ_BUFFER_SIZE],
            }),
            writer: Box::new(TcpFrameWriter { half: write }),
            peer,
        })
    }

    fn address(&self) -> String {
        self.endpoint.address()
    }
}

struct TcpFrameReader {
    half: OwnedReadHalf,
    buf: Vec<u8>,
}

#[async_trait]
impl FrameReader for TcpFrameReader {
    async fn read_frame(&mut self) -> Result<Bytes, TransportError> {
        let n = self
            .half
            .read(&mut self.buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(Bytes::copy_from_slice(&self.buf[..n]))
    }
}

struct TcpFrameWriter {
    half: OwnedWriteHalf,
}

#[async_trait]
impl FrameWriter for TcpFrameWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.half
            .write_all(frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn shutdown(&mut self) {
        let _ = self.half.shutdown().await;
    }
}
