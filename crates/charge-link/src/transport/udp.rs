//! UDP transport
//!
//! The socket is bound to an ephemeral local port and connected to the
//! station, so `connect` succeeds without the station answering. Liveness
//! then rests on the read side: an ICMP port-unreachable surfaces as a
//! receive error and tears the link down.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;

use super::{Connector, FrameReader, FrameWriter, Link, TransportError, READ_BUFFER_SIZE};
use crate::config::EndpointConfig;

pub struct UdpConnector {
    endpoint: EndpointConfig,
}

impl UdpConnector {
    pub fn new(config: &EndpointConfig) -> Self {
        Self {
            endpoint: config.clone(),
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, TransportError> {
        tokio::net::lookup_host((self.endpoint.host.as_str(), self.endpoint.port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.address(), e)))?
            .next()
            .ok_or_else(|| {
                TransportError::ConnectionFailed(format!("{}: no address", self.address()))
            })
    }
}

#[async_trait]
impl Connector for UdpConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let remote = self.resolve().await?;
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {}: {}", local, e)))?;
        socket
            .connect(remote)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", remote, e)))?;
        let socket = Arc::new(socket);

        Ok(Link {
            reader: Box::new(UdpFrameReader {
                socket: socket.clone(),
                buf: vec![0; READ_BUFFER_SIZE],
            }),
            writer: Box::new(UdpFrameWriter { socket }),
            peer: remote.to_string(),
        })
    }

    fn address(&self) -> String {
        self.endpoint.address()
    }
}

struct UdpFrameReader {
    socket: Arc<UdpSocket>,
    buf: Vec<u8>,
}

#[async_trait]
impl FrameReader for UdpFrameReader {
    async fn read_frame(&mut self) -> Result<Bytes, TransportError> {
        let n = self
            .socket
            .recv(&mut self.buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        Ok(Bytes::copy_from_slice(&self.buf[..n]))
    }
}

struct UdpFrameWriter {
    socket: Arc<UdpSocket>,
}

#[async_trait]
impl FrameWriter for UdpFrameWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let sent = self
            .socket
            .send(frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if sent != frame.len() {
            return Err(TransportError::SendFailed(format!(
                "short datagram: {} of {} bytes",
                sent,
                frame.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn datagrams_flow_both_ways() {
        let station = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = station.local_addr().unwrap().port();

        let connector = UdpConnector::new(&EndpointConfig::new("127.0.0.1", port));
        let mut link = connector.connect().await.unwrap();

        link.writer.write_frame(&[0xAB, 0xCD]).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = station.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xAB, 0xCD]);

        station.send_to(&[0x01, 0, 0, 0, 0, 0], from).await.unwrap();
        let frame = link.reader.read_frame().await.unwrap();
        assert_eq!(frame.len(), 6);
    }
}
