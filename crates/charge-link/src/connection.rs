//! Resilient link to one charging station
//!
//! A [`DeviceConnection`] owns a supervisor task:
//!
//! ```text
//!            ┌──────────── connect failed: sleep retry_delay ───────────┐
//!            ▼                                                          │
//!   ─▶ Connecting ──connect──▶ Connected ──┬─ read task  (frames in)    │
//!            ▲                             └─ write task (queue + poll) │
//!            │                                      │                   │
//!            └────────────── link lost ─────────────┘                   │
//!                                                                        │
//!   close(): Closing ─▶ Closed  (from any state)  ◀─────────────────────┘
//! ```
//!
//! Each connected session gets its own child cancellation token; both tasks
//! are stopped and the link halves dropped before the next connect attempt,
//! so at most one socket is alive per connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use charge_core::{ConnectionStatus, StationId};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::CommandCodec;
use crate::config::ConnectionOptions;
use crate::error::LinkError;
use crate::observer::LinkObserver;
use crate::packet::decode_status;
use crate::transport::{Connector, FrameReader, FrameWriter, Link};

/// Upper bound on waiting for a session task once its session has ended
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a [`DeviceConnection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// "Became ready at least once". Never goes back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    /// Closed before the first successful connect
    Abandoned,
}

struct Shared {
    station_id: StationId,
    address: String,
    codec: CommandCodec,
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    observer: Arc<dyn LinkObserver>,
    queue_tx: mpsc::Sender<Bytes>,
    /// Held by the write task for the duration of a session
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    state: watch::Sender<ConnectionState>,
    readiness: watch::Sender<Readiness>,
    cancel: CancellationToken,
    closed: AtomicBool,
    connect_count: AtomicU64,
    ready_signals: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn on_connected(&self, peer: &str) {
        let connects = self.connect_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Connected);
        info!(
            station_id = %self.station_id,
            address = %self.address,
            peer,
            connects,
            "Connected to station"
        );

        let first = self.readiness.send_if_modified(|readiness| {
            if *readiness == Readiness::Pending {
                *readiness = Readiness::Ready;
                true
            } else {
                false
            }
        });
        if first {
            self.ready_signals.fetch_add(1, Ordering::SeqCst);
            debug!(station_id = %self.station_id, "Connection ready");
        }

        self.observer
            .on_connection_change(ConnectionStatus::connected(self.station_id.clone()));
    }

    fn on_disconnected(&self, reason: &str) {
        self.set_state(ConnectionState::Disconnected);
        self.observer.on_connection_change(ConnectionStatus::disconnected(
            self.station_id.clone(),
            reason,
        ));
    }

    fn handle_frame(&self, frame: &[u8]) {
        debug!(
            station_id = %self.station_id,
            len = frame.len(),
            frame = %hex::encode_upper(frame),
            "Frame received"
        );
        match decode_status(frame) {
            Ok(status) => self.observer.on_status(status),
            Err(e) => warn!(station_id = %self.station_id, error = %e, "Dropping status frame"),
        }
    }

    /// Write one frame unless the session ends first
    ///
    /// Returns `false` when the session was cancelled mid-write.
    async fn write_frame(
        &self,
        writer: &mut dyn FrameWriter,
        frame: &[u8],
        session: &CancellationToken,
    ) -> bool {
        let result = tokio::select! {
            _ = session.cancelled() => return false,
            result = writer.write_frame(frame) => result,
        };
        match result {
            Ok(()) => debug!(
                station_id = %self.station_id,
                frame = %hex::encode_upper(frame),
                "Frame sent"
            ),
            // Write failures do not tear the link down; the read side decides
            Err(e) => warn!(station_id = %self.station_id, error = %e, "Write failed"),
        }
        true
    }
}

/// One supervised link to one station
///
/// Created by [`DeviceConnection::open`], which returns immediately and
/// connects in the background. Must be created inside a Tokio runtime.
pub struct DeviceConnection {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceConnection {
    pub fn open(
        station_id: StationId,
        connector: Arc<dyn Connector>,
        codec: CommandCodec,
        options: ConnectionOptions,
        observer: Arc<dyn LinkObserver>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (readiness, _) = watch::channel(Readiness::Pending);
        let address = connector.address();

        let shared = Arc::new(Shared {
            station_id,
            address,
            codec,
            options,
            connector,
            observer,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            state,
            readiness,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            connect_count: AtomicU64::new(0),
            ready_signals: AtomicU64::new(0),
        });

        info!(
            station_id = %shared.station_id,
            address = %shared.address,
            format = ?shared.codec.format(),
            "Opening station connection"
        );
        let supervisor = tokio::spawn(supervise(shared.clone()));

        Self {
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    pub fn station_id(&self) -> &StationId {
        &self.shared.station_id
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Successful handshakes so far
    pub fn connect_count(&self) -> u64 {
        self.shared.connect_count.load(Ordering::SeqCst)
    }

    /// Times readiness was signalled; never more than one
    pub fn ready_signals(&self) -> u64 {
        self.shared.ready_signals.load(Ordering::SeqCst)
    }

    /// Frames waiting in the outbound queue
    pub fn queued(&self) -> usize {
        let tx = &self.shared.queue_tx;
        tx.max_capacity() - tx.capacity()
    }

    /// Wait for the first successful connect
    ///
    /// Returns immediately once the connection has been ready at least once,
    /// even if it is currently reconnecting. Fails with `Closed` if the
    /// connection is closed before ever becoming ready.
    pub async fn wait_until_ready(&self) -> Result<(), LinkError> {
        let mut rx = self.shared.readiness.subscribe();
        let readiness = rx
            .wait_for(|r| *r != Readiness::Pending)
            .await
            .map(|r| *r)
            .unwrap_or(Readiness::Abandoned);

        match readiness {
            Readiness::Ready => Ok(()),
            _ => Err(LinkError::Closed(self.shared.station_id.clone())),
        }
    }

    /// Encode `command` and queue it for the write task
    ///
    /// Never blocks. A full queue yields `Backpressure`.
    pub fn send_command(&self, command: &str) -> Result<(), LinkError> {
        let frame = self.shared.codec.encode(&self.shared.station_id, command)?;
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed(self.shared.station_id.clone()));
        }

        match self.shared.queue_tx.try_send(frame) {
            Ok(()) => {
                debug!(station_id = %self.shared.station_id, command, "Command queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(station_id = %self.shared.station_id, command, "Command queue full");
                Err(LinkError::Backpressure(self.shared.station_id.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(LinkError::Closed(self.shared.station_id.clone())),
        }
    }

    /// Stop the supervisor and release the link
    ///
    /// Idempotent; later calls return immediately.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.state.send_replace(ConnectionState::Closing);
        self.shared.readiness.send_if_modified(|readiness| {
            if *readiness == Readiness::Pending {
                *readiness = Readiness::Abandoned;
                true
            } else {
                false
            }
        });
        self.shared.cancel.cancel();

        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                error!(station_id = %self.shared.station_id, error = %e, "Supervisor task failed");
            }
        }

        self.shared.state.send_replace(ConnectionState::Closed);
        info!(station_id = %self.shared.station_id, "Station connection closed");
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

enum SessionEnd {
    LinkLost(String),
    Cancelled,
}

async fn supervise(shared: Arc<Shared>) {
    while !shared.cancel.is_cancelled() {
        shared.set_state(ConnectionState::Connecting);

        let attempt = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            attempt = shared.connector.connect() => attempt,
        };

        match attempt {
            Ok(link) => {
                shared.on_connected(&link.peer);
                match run_session(&shared, link).await {
                    SessionEnd::LinkLost(reason) => {
                        warn!(
                            station_id = %shared.station_id,
                            address = %shared.address,
                            reason = %reason,
                            "Connection lost, reconnecting"
                        );
                        shared.on_disconnected(&reason);
                    }
                    SessionEnd::Cancelled => {
                        shared.on_disconnected("connection closed");
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(
                    station_id = %shared.station_id,
                    address = %shared.address,
                    error = %e,
                    retry_in_ms = shared.options.retry_delay.as_millis() as u64,
                    "Connect failed"
                );
                shared.set_state(ConnectionState::Disconnected);
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = tokio::time::sleep(shared.options.retry_delay) => {}
                }
            }
        }
    }
    debug!(station_id = %shared.station_id, "Supervisor exiting");
}

/// Run the read and write tasks until the link drops or the connection closes
async fn run_session(shared: &Arc<Shared>, link: Link) -> SessionEnd {
    let Link { reader, writer, .. } = link;
    let session = shared.cancel.child_token();
    let (lost_tx, lost_rx) = oneshot::channel();

    let read_task = tokio::spawn(read_loop(shared.clone(), reader, lost_tx, session.clone()));
    let write_task = tokio::spawn(write_loop(shared.clone(), writer, session.clone()));

    let end = tokio::select! {
        reason = lost_rx => SessionEnd::LinkLost(
            reason.unwrap_or_else(|_| "read task ended".to_string())
        ),
        _ = shared.cancel.cancelled() => SessionEnd::Cancelled,
    };

    session.cancel();
    if let Some(Err(e)) = join_bounded(shared, "read", read_task).await {
        if !e.is_cancelled() {
            error!(station_id = %shared.station_id, error = %e, "Read task failed");
        }
    }
    match join_bounded(shared, "write", write_task).await {
        Some(Ok(mut writer)) => {
            if tokio::time::timeout(TASK_STOP_TIMEOUT, writer.shutdown())
                .await
                .is_err()
            {
                warn!(station_id = %shared.station_id, "Link shutdown timed out");
            }
        }
        Some(Err(e)) if !e.is_cancelled() => {
            error!(station_id = %shared.station_id, error = %e, "Write task failed")
        }
        _ => {}
    }
    end
}

/// Wait for a session task to stop, aborting it after [`TASK_STOP_TIMEOUT`]
async fn join_bounded<T>(
    shared: &Shared,
    task: &str,
    mut handle: JoinHandle<T>,
) -> Option<Result<T, JoinError>> {
    match tokio::time::timeout(TASK_STOP_TIMEOUT, &mut handle).await {
        Ok(result) => Some(result),
        Err(_) => {
            warn!(station_id = %shared.station_id, task, "Session task did not stop, aborting");
            handle.abort();
            None
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut reader: Box<dyn FrameReader>,
    lost: oneshot::Sender<String>,
    session: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = session.cancelled() => return,
            frame = reader.read_frame() => frame,
        };
        match frame {
            Ok(frame) => shared.handle_frame(&frame),
            Err(e) => {
                debug!(station_id = %shared.station_id, error = %e, "Read failed");
                let _ = lost.send(e.to_string());
                return;
            }
        }
    }
}

/// Drain the command queue and emit status polls until the session ends
///
/// Hands the writer back so the session can shut it down.
async fn write_loop(
    shared: Arc<Shared>,
    mut writer: Box<dyn FrameWriter>,
    session: CancellationToken,
) -> Box<dyn FrameWriter> {
    let mut queue = shared.queue_rx.lock().await;
    let mut poll = status_poll(&shared);

    loop {
        tokio::select! {
            biased;
            _ = session.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => {
                    if !shared.write_frame(writer.as_mut(), &frame, &session).await {
                        break;
                    }
                }
                None => break,
            },
            Some(frame) = next_poll(&mut poll) => {
                if !shared.write_frame(writer.as_mut(), &frame, &session).await {
                    break;
                }
            }
        }
    }
    drop(queue);
    writer
}

fn status_poll(shared: &Shared) -> Option<(Interval, Bytes)> {
    let period: Duration = shared.options.poll_interval?;
    let frame = match shared.codec.encode(&shared.station_id, "read") {
        Ok(frame) => frame,
        Err(e) => {
            debug!(station_id = %shared.station_id, error = %e, "Status polling disabled");
            return None;
        }
    };
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some((ticker, frame))
}

async fn next_poll(poll: &mut Option<(Interval, Bytes)>) -> Option<Bytes> {
    match poll {
        Some((ticker, frame)) => {
            ticker.tick().await;
            Some(frame.clone())
        }
        None => std::future::pending().await,
    }
}
