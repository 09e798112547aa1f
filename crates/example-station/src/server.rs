//! TCP and UDP listeners for a simulated station

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use charge_link::transport::READ_BUFFER_SIZE;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::station::StationState;

/// Socket type the station listens on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

/// A running station listener
///
/// Dropping the server stops it; [`StationServer::shutdown`] also waits for
/// every peer task to finish.
pub struct StationServer {
    protocol: Protocol,
    local_addr: SocketAddr,
    state: Arc<StationState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl StationServer {
    /// Bind `addr` (port 0 picks an ephemeral port) and start serving
    pub async fn bind(
        protocol: Protocol,
        addr: SocketAddr,
        state: Arc<StationState>,
    ) -> io::Result<Self> {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let local_addr = match protocol {
            Protocol::Tcp => {
                let listener = tcp_listener(addr)?;
                let local_addr = listener.local_addr()?;
                tracker.spawn(serve_tcp(
                    listener,
                    state.clone(),
                    cancel.clone(),
                    tracker.clone(),
                ));
                local_addr
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind(addr).await?;
                let local_addr = socket.local_addr()?;
                tracker.spawn(serve_udp(socket, state.clone(), cancel.clone()));
                local_addr
            }
        };

        info!(station = state.id(), ?protocol, %local_addr, "Station listening");
        Ok(Self {
            protocol,
            local_addr,
            state,
            cancel,
            tracker,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<StationState> {
        &self.state
    }

    /// Stop listening, drop every peer and wait for the tasks to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(station = self.state.id(), local_addr = %self.local_addr, "Station stopped");
    }
}

impl Drop for StationServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Listener that can rebind a port a previous run just released
fn tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(64)
}

async fn serve_tcp(
    listener: TcpListener,
    state: Arc<StationState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(station = state.id(), %peer, "Gateway connected");
                    tracker.spawn(serve_tcp_peer(stream, peer, state.clone(), cancel.clone()));
                }
                Err(e) => warn!(station = state.id(), error = %e, "Accept failed"),
            }
        }
    }
}

async fn serve_tcp_peer(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: Arc<StationState>,
    cancel: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    info!(station = state.id(), %peer, "Gateway disconnected");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(station = state.id(), %peer, error = %e, "Read failed");
                    break;
                }
            }
        };

        // Back-to-back writes from the gateway can arrive in one read
        for frame in state.split_frames(&buf[..n]) {
            let reply = state.handle_frame(frame);
            if let Err(e) = stream.write_all(&reply).await {
                warn!(station = state.id(), %peer, error = %e, "Write failed");
                return;
            }
        }
    }
}

async fn serve_udp(socket: UdpSocket, state: Arc<StationState>, cancel: CancellationToken) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => {
                    let reply = state.handle_frame(&buf[..n]);
                    if let Err(e) = socket.send_to(&reply, peer).await {
                        warn!(station = state.id(), %peer, error = %e, "Send failed");
                    }
                }
                Err(e) => debug!(station = state.id(), error = %e, "Receive failed"),
            }
        }
    }
}
