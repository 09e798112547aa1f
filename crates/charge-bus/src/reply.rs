//! Request/reply on top of [`EventBus`]
//!
//! Each request is wrapped in an [`Envelope`] carrying a fresh correlation
//! id. The requester parks on a one-shot slot keyed by that id until a
//! responder calls [`ReplyBus::reply`], the deadline passes, or the bus is
//! closed. A background sweeper expires slots whose deadline has passed so
//! abandoned requests do not accumulate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BusConfig, EventBus};
use crate::error::{BusError, BusResult};
use crate::middleware::Middleware;
use crate::subscriber::{Event, Subscriber};

/// A request payload tagged with its correlation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T> {
    pub correlation_id: String,
    pub payload: T,
}

#[derive(Debug, Clone)]
pub struct ReplyConfig {
    /// How often stale pending requests are expired
    pub sweep_interval: Duration,
    /// Sizing of the underlying request bus
    pub bus: BusConfig,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            bus: BusConfig::default(),
        }
    }
}

struct PendingReply<R> {
    slot: oneshot::Sender<BusResult<R>>,
    deadline: Instant,
}

/// Correlation id to waiting requester
struct PendingTable<R> {
    entries: Mutex<HashMap<String, PendingReply<R>>>,
}

impl<R: Send + 'static> PendingTable<R> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, id: String, slot: oneshot::Sender<BusResult<R>>, deadline: Instant) {
        self.entries
            .lock()
            .insert(id, PendingReply { slot, deadline });
    }

    fn remove(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Complete a pending request. The entry is removed before delivery so
    /// a second reply for the same id sees `NoSuchPending`.
    fn deliver(&self, id: &str, response: R) -> BusResult<()> {
        let Some(pending) = self.entries.lock().remove(id) else {
            return Err(BusError::NoSuchPending(id.to_string()));
        };
        pending
            .slot
            .send(Ok(response))
            .map_err(|_| BusError::DeliveryBlocked(id.to_string()))
    }

    fn expire(&self, now: Instant) -> usize {
        let expired: Vec<(String, PendingReply<R>)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove_entry(&id))
                .collect()
        };

        let count = expired.len();
        for (id, pending) in expired {
            debug!(correlation_id = %id, "Expired stale pending request");
            let _ = pending.slot.send(Err(BusError::Timeout));
        }
        count
    }

    fn flush(&self, err: BusError) -> usize {
        let drained: Vec<PendingReply<R>> =
            self.entries.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.slot.send(Err(err.clone()));
        }
        count
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

struct ReplyInner<T: Event, R> {
    bus: EventBus<Envelope<T>>,
    pending: Arc<PendingTable<R>>,
    sweeper_token: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<T: Event, R> Drop for ReplyInner<T, R> {
    fn drop(&mut self) {
        self.sweeper_token.cancel();
    }
}

/// Correlated request/reply bus
///
/// `T` is the request payload, `R` the response. Cloning yields another
/// handle to the same bus.
pub struct ReplyBus<T: Event, R> {
    inner: Arc<ReplyInner<T, R>>,
}

impl<T: Event, R> Clone for ReplyBus<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Event, R: Send + 'static> ReplyBus<T, R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ReplyConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ReplyConfig) -> Self {
        let bus = EventBus::with_config(name, config.bus);
        let pending = Arc::new(PendingTable::new());
        let sweeper_token = CancellationToken::new();
        let sweeper = tokio::spawn(sweep(
            pending.clone(),
            config.sweep_interval,
            sweeper_token.clone(),
        ));

        Self {
            inner: Arc::new(ReplyInner {
                bus,
                pending,
                sweeper_token,
                sweeper: Mutex::new(Some(sweeper)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Underlying request bus
    pub fn bus(&self) -> &EventBus<Envelope<T>> {
        &self.inner.bus
    }

    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<Envelope<T>> + 'static,
    {
        self.inner.bus.subscribe(subscriber);
    }

    pub fn use_middleware<M>(&self, middleware: M)
    where
        M: Middleware<Envelope<T>> + 'static,
    {
        self.inner.bus.use_middleware(middleware);
    }

    /// Subscribe a responder that answers every request with `respond`
    ///
    /// Replies that lose the race against expiry are dropped quietly.
    pub fn respond_with<F>(&self, respond: F)
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(Responder {
            pending: self.inner.pending.clone(),
            respond,
        });
    }

    /// Publish `payload` and wait up to `timeout` for the matching reply
    pub async fn request_and_wait(&self, payload: T, timeout: Duration) -> BusResult<R> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .insert(correlation_id.clone(), tx, Instant::now() + timeout);

        let envelope = Envelope {
            correlation_id: correlation_id.clone(),
            payload,
        };
        if let Err(e) = self.inner.bus.publish_async(envelope) {
            self.inner.pending.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Slot dropped without a value: only happens on teardown
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => {
                self.inner.pending.remove(&correlation_id);
                debug!(%correlation_id, ?timeout, "Request timed out");
                Err(BusError::Timeout)
            }
        }
    }

    /// Deliver `response` to the requester waiting on `correlation_id`
    pub fn reply(&self, correlation_id: &str, response: R) -> BusResult<()> {
        let result = self.inner.pending.deliver(correlation_id, response);
        if let Err(e) = &result {
            debug!(%correlation_id, error = %e, "Reply not delivered");
        }
        result
    }

    /// Number of requests still waiting for a reply
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop the sweeper, fail every waiter with `Closed`, then close the bus
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.sweeper_token.cancel();
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }

        let flushed = self.inner.pending.flush(BusError::Closed);
        if flushed > 0 {
            warn!(bus = %self.inner.bus.name(), flushed, "Closed with requests still pending");
        }
        self.inner.bus.close().await;
        info!(bus = %self.inner.bus.name(), "Reply bus closed");
    }
}

async fn sweep<R: Send + 'static>(
    pending: Arc<PendingTable<R>>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let expired = pending.expire(Instant::now());
        if expired > 0 {
            debug!(expired, "Swept pending requests");
        }
    }
}

struct Responder<R, F> {
    pending: Arc<PendingTable<R>>,
    respond: F,
}

#[async_trait]
impl<T, R, F> Subscriber<Envelope<T>> for Responder<R, F>
where
    T: Event,
    R: Send + 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
{
    async fn handle(&self, event: &Envelope<T>) -> BusResult<()> {
        let response = (self.respond)(&event.payload);
        match self.pending.deliver(&event.correlation_id, response) {
            Err(e) if e.is_benign_race() => {
                debug!(correlation_id = %event.correlation_id, error = %e, "Dropped late reply");
                Ok(())
            }
            other => other,
        }
    }
}
