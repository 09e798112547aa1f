//! Mock transport for testing
//!
//! Every `connect` on a [`MockConnector`] parks until the paired
//! [`MockController`] decides the outcome: `accept()` hands back the station
//! side of the new link as a [`MockPeer`], `refuse()` fails the attempt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use super::{Connector, FrameReader, FrameWriter, Link, TransportError};

enum Outcome {
    Accept(Link),
    Refuse(String),
}

/// Create a connected connector/controller pair
pub fn mock_pair(address: impl Into<String>) -> (MockConnector, MockController) {
    let (tx, rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));
    let address = address.into();
    (
        MockConnector {
            outcomes: Mutex::new(rx),
            attempts: attempts.clone(),
            address: address.clone(),
        },
        MockController {
            outcomes: tx,
            attempts,
            address,
        },
    )
}

pub struct MockConnector {
    outcomes: Mutex<mpsc::UnboundedReceiver<Outcome>>,
    attempts: Arc<AtomicUsize>,
    address: String,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().await.recv().await {
            Some(Outcome::Accept(link)) => Ok(link),
            Some(Outcome::Refuse(reason)) => Err(TransportError::ConnectionFailed(reason)),
            None => Err(TransportError::ConnectionFailed(
                "mock controller dropped".to_string(),
            )),
        }
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

/// Test-side handle deciding connect outcomes
#[derive(Clone)]
pub struct MockController {
    outcomes: mpsc::UnboundedSender<Outcome>,
    attempts: Arc<AtomicUsize>,
    address: String,
}

impl MockController {
    /// Let the next connect attempt succeed
    pub fn accept(&self) -> MockPeer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let link = Link {
            reader: Box::new(MockFrameReader { rx: inbound_rx }),
            writer: Box::new(MockFrameWriter { tx: outbound_tx }),
            peer: self.address.clone(),
        };
        let _ = self.outcomes.send(Outcome::Accept(link));
        MockPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        }
    }

    /// Fail the next connect attempt
    pub fn refuse(&self, reason: impl Into<String>) {
        let _ = self.outcomes.send(Outcome::Refuse(reason.into()));
    }

    /// Connect attempts started so far, including the one currently parked
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` connect attempts have started
    pub async fn wait_for_attempts(&self, n: usize) {
        while self.attempts() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Station side of an accepted mock link
///
/// Dropping it closes the link: the connection's next read fails.
pub struct MockPeer {
    inbound: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
}

impl MockPeer {
    /// Deliver a frame to the connection
    pub fn send(&self, frame: impl Into<Bytes>) -> bool {
        self.inbound.send(Ok(frame.into())).is_ok()
    }

    /// Make the connection's pending read fail
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self
            .inbound
            .send(Err(TransportError::ReceiveFailed(reason.into())));
    }

    /// Next frame written by the connection, `None` once its writer is gone
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Bytes> {
        tokio::time::timeout(timeout, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Whether the connection dropped its reading half
    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }
}

struct MockFrameReader {
    rx: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
}

#[async_trait]
impl FrameReader for MockFrameReader {
    async fn read_frame(&mut self) -> Result<Bytes, TransportError> {
        self.rx
            .recv()
            .await
            .unwrap_or(Err(TransportError::ConnectionClosed))
    }
}

struct MockFrameWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl FrameWriter for MockFrameWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| TransportError::SendFailed("mock peer dropped".to_string()))
    }
}
