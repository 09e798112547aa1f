//! Publish/subscribe event bus with an auto-scaling worker pool

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{BusError, BusResult};
use crate::middleware::{panic_message, Middleware, Next};
use crate::subscriber::{Event, Subscriber};

/// Worker pool and queue sizing
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Capacity of the async publish queue
    pub queue_capacity: usize,
    /// Scale-down floor
    pub min_workers: usize,
    /// Workers started by the constructor
    pub initial_workers: usize,
    /// Scale-up ceiling
    pub max_workers: usize,
    /// How often the autoscaler samples the backlog
    pub scale_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            queue_capacity: 2000,
            min_workers: cpus,
            initial_workers: cpus * 5,
            max_workers: cpus * 20,
            scale_interval: Duration::from_secs(1),
        }
    }
}

impl BusConfig {
    /// Fixed worker counts, mostly useful in tests
    pub fn with_workers(mut self, min: usize, initial: usize, max: usize) -> Self {
        self.min_workers = min.max(1);
        self.max_workers = max.max(self.min_workers);
        self.initial_workers = initial.clamp(self.min_workers, self.max_workers);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_scale_interval(mut self, interval: Duration) -> Self {
        self.scale_interval = interval.max(Duration::from_millis(10));
        self
    }
}

/// Point-in-time view of a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted by `publish_async` and not yet picked up by a worker
    pub backlog: usize,
    /// Worker count the autoscaler is aiming for
    pub target_workers: usize,
    /// Worker tasks currently alive
    pub live_workers: usize,
    pub subscribers: usize,
    pub middlewares: usize,
    pub closed: bool,
}

/// State shared between the bus handle and its worker tasks
struct Shared<T: Event> {
    name: String,
    subscribers: RwLock<Vec<Arc<dyn Subscriber<T>>>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware<T>>>>,
    backlog: AtomicUsize,
    target_workers: AtomicUsize,
    live_workers: AtomicUsize,
}

impl<T: Event> Shared<T> {
    async fn dispatch(&self, event: &T) -> BusResult<()> {
        // Snapshot so (un)subscribing during dispatch never deadlocks
        let subscribers = self.subscribers.read().clone();
        let middlewares = self.middlewares.read().clone();
        Next::new(&middlewares, &subscribers).run(event).await
    }
}

struct BusInner<T: Event> {
    shared: Arc<Shared<T>>,
    sender: Mutex<Option<mpsc::Sender<T>>>,
    tasks: TaskTracker,
    scaler_token: CancellationToken,
    scaler: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<T: Event> Drop for BusInner<T> {
    fn drop(&mut self) {
        self.scaler_token.cancel();
    }
}

/// Typed publish/subscribe bus
///
/// Cloning yields another handle to the same bus. Must be created inside a
/// Tokio runtime since the worker pool is spawned eagerly.
pub struct EventBus<T: Event> {
    inner: Arc<BusInner<T>>,
}

impl<T: Event> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Event> EventBus<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, BusConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: BusConfig) -> Self {
        let config = BusConfig::default()
            .with_queue_capacity(config.queue_capacity)
            .with_workers(config.min_workers, config.initial_workers, config.max_workers)
            .with_scale_interval(config.scale_interval);

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            name: name.into(),
            subscribers: RwLock::new(Vec::new()),
            middlewares: RwLock::new(Vec::new()),
            backlog: AtomicUsize::new(0),
            target_workers: AtomicUsize::new(config.initial_workers),
            live_workers: AtomicUsize::new(0),
        });
        let tasks = TaskTracker::new();

        for _ in 0..config.initial_workers {
            spawn_worker(&tasks, shared.clone(), receiver.clone());
        }

        let scaler_token = CancellationToken::new();
        let scaler = tokio::spawn(autoscale(
            shared.clone(),
            receiver,
            tasks.clone(),
            config.clone(),
            scaler_token.clone(),
        ));

        debug!(
            bus = %shared.name,
            workers = config.initial_workers,
            queue = config.queue_capacity,
            "Event bus started"
        );

        Self {
            inner: Arc::new(BusInner {
                shared,
                sender: Mutex::new(Some(tx)),
                tasks,
                scaler_token,
                scaler: Mutex::new(Some(scaler)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Append a subscriber; delivery order follows subscription order
    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<T> + 'static,
    {
        self.subscribe_arc(Arc::new(subscriber));
    }

    pub fn subscribe_arc(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.inner.shared.subscribers.write().push(subscriber);
    }

    /// Append a middleware; the first one registered wraps all later ones
    pub fn use_middleware<M>(&self, middleware: M)
    where
        M: Middleware<T> + 'static,
    {
        self.inner.shared.middlewares.write().push(Arc::new(middleware));
    }

    /// Deliver on the caller's task and return the first handler error
    pub async fn publish_sync(&self, event: &T) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        self.inner.shared.dispatch(event).await
    }

    /// Hand the event to the worker pool without waiting for delivery
    ///
    /// Never blocks: when the queue is full the event is dispatched on a
    /// dedicated task instead. Handler errors are only logged.
    pub fn publish_async(&self, event: T) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let sender = self.inner.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(BusError::Closed);
        };

        let shared = &self.inner.shared;
        shared.backlog.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                shared.backlog.fetch_sub(1, Ordering::SeqCst);
                debug!(bus = %shared.name, "Queue full, dispatching on dedicated task");
                let shared = shared.clone();
                self.inner.tasks.spawn(async move {
                    dispatch_logged(&shared, event).await;
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                shared.backlog.fetch_sub(1, Ordering::SeqCst);
                Err(BusError::Closed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BusStats {
        let shared = &self.inner.shared;
        BusStats {
            backlog: shared.backlog.load(Ordering::SeqCst),
            target_workers: shared.target_workers.load(Ordering::SeqCst),
            live_workers: shared.live_workers.load(Ordering::SeqCst),
            subscribers: shared.subscribers.read().len(),
            middlewares: shared.middlewares.read().len(),
            closed: self.is_closed(),
        }
    }

    /// Stop accepting events, drain the queue and wait for every worker
    ///
    /// Idempotent. In-flight handlers run to completion.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.scaler_token.cancel();
        let scaler = self.inner.scaler.lock().take();
        if let Some(handle) = scaler {
            let _ = handle.await;
        }

        // Dropping the sender lets workers drain what is queued, then exit
        self.inner.sender.lock().take();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        info!(bus = %self.inner.shared.name, "Event bus closed");
    }
}

async fn dispatch_logged<T: Event>(shared: &Shared<T>, event: T) {
    match AssertUnwindSafe(shared.dispatch(&event)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(bus = %shared.name, error = %e, "Async dispatch failed");
        }
        Err(panic) => {
            error!(
                bus = %shared.name,
                panic = %panic_message(panic.as_ref()),
                "Handler panicked during async dispatch"
            );
        }
    }
}

fn spawn_worker<T: Event>(
    tasks: &TaskTracker,
    shared: Arc<Shared<T>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
) {
    shared.live_workers.fetch_add(1, Ordering::SeqCst);
    tasks.spawn(async move {
        loop {
            let next = receiver.lock().await.recv().await;
            let Some(event) = next else { break };
            shared.backlog.fetch_sub(1, Ordering::SeqCst);
            dispatch_logged(&shared, event).await;
        }
        shared.live_workers.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Periodically compare backlog against the worker target
///
/// Grows by half the current target when the backlog exceeds twice the
/// target, and lowers the target by one while the queue stays empty.
/// Lowering the target does not stop running workers.
async fn autoscale<T: Event>(
    shared: Arc<Shared<T>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
    tasks: TaskTracker,
    config: BusConfig,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.scale_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let backlog = shared.backlog.load(Ordering::SeqCst);
        let target = shared.target_workers.load(Ordering::SeqCst);

        if backlog > target * 2 && target < config.max_workers {
            let add = (target / 2).max(1).min(config.max_workers - target);
            for _ in 0..add {
                spawn_worker(&tasks, shared.clone(), receiver.clone());
            }
            shared.target_workers.fetch_add(add, Ordering::SeqCst);
            info!(bus = %shared.name, backlog, workers = target + add, "Scaled up worker pool");
        } else if backlog == 0 && target > config.min_workers {
            shared.target_workers.fetch_sub(1, Ordering::SeqCst);
            debug!(bus = %shared.name, workers = target - 1, "Lowered worker target");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::RecoveryMiddleware;
    use crate::subscriber::FnSubscriber;
    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedSender;

    fn small() -> BusConfig {
        BusConfig::default()
            .with_workers(1, 2, 4)
            .with_queue_capacity(8)
    }

    struct Forward(UnboundedSender<u32>);

    #[async_trait]
    impl Subscriber<u32> for Forward {
        async fn handle(&self, event: &u32) -> BusResult<()> {
            let _ = self.0.send(*event);
            Ok(())
        }
    }

    /// Blocks until released
    struct Blocker(CancellationToken);

    #[async_trait]
    impl Subscriber<u32> for Blocker {
        async fn handle(&self, _: &u32) -> BusResult<()> {
            self.0.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn sync_publish_visits_subscribers_in_order() {
        let bus = EventBus::with_config("test", small());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for tag in [10u32, 20, 30] {
            let tx = tx.clone();
            bus.subscribe(FnSubscriber::new(move |e: &u32| -> BusResult<()> {
                let _ = tx.send(tag + e);
                Ok(())
            }));
        }

        bus.publish_sync(&1).await.unwrap();

        assert_eq!(rx.recv().await, Some(11));
        assert_eq!(rx.recv().await, Some(21));
        assert_eq!(rx.recv().await, Some(31));
        bus.close().await;
    }

    #[tokio::test]
    async fn sync_publish_stops_at_first_error() {
        let bus = EventBus::with_config("test", small());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.subscribe(FnSubscriber::new(|_: &u32| -> BusResult<()> {
            Err(BusError::handler("nope"))
        }));
        bus.subscribe(Forward(tx));

        let err = bus.publish_sync(&5).await.unwrap_err();
        assert_eq!(err, BusError::Handler("nope".to_string()));
        assert!(rx.try_recv().is_err());
        bus.close().await;
    }

    #[tokio::test]
    async fn async_publish_reaches_subscribers() {
        let bus = EventBus::with_config("test", small());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.subscribe(Forward(tx));

        for i in 0..5 {
            bus.publish_async(i).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(rx.recv().await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        bus.close().await;
    }

    #[tokio::test]
    async fn async_publish_does_not_block_when_saturated() {
        let bus = EventBus::with_config(
            "test",
            BusConfig::default().with_workers(1, 1, 1).with_queue_capacity(1),
        );
        let release = CancellationToken::new();
        bus.subscribe(Blocker(release.clone()));

        // Worker busy, queue full, everything else overflows to tasks
        let publishing = async {
            for i in 0..50 {
                bus.publish_async(i).unwrap();
            }
        };
        tokio::time::timeout(Duration::from_millis(200), publishing)
            .await
            .expect("publish_async blocked");

        release.cancel();
        bus.close().await;
    }

    #[tokio::test]
    async fn recovery_keeps_bus_usable_after_panic() {
        let bus = EventBus::with_config("test", small());
        bus.use_middleware(RecoveryMiddleware);
        bus.subscribe(FnSubscriber::new(|e: &u32| -> BusResult<()> {
            if *e == 13 {
                panic!("unlucky");
            }
            Ok(())
        }));

        assert!(matches!(
            bus.publish_sync(&13).await,
            Err(BusError::Panicked(_))
        ));
        assert!(bus.publish_sync(&1).await.is_ok());
        bus.close().await;
    }

    #[tokio::test]
    async fn close_drains_queue_and_rejects_new_events() {
        let bus = EventBus::with_config("test", small());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.subscribe(Forward(tx));

        for i in 0..4 {
            bus.publish_async(i).unwrap();
        }
        bus.close().await;

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 4);
        assert_eq!(bus.publish_async(9), Err(BusError::Closed));
        assert_eq!(bus.publish_sync(&9).await, Err(BusError::Closed));
        assert!(bus.stats().closed);
        assert_eq!(bus.stats().live_workers, 0);

        // Second close is a no-op
        bus.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn autoscaler_grows_pool_under_backlog() {
        let bus = EventBus::with_config(
            "test",
            BusConfig::default().with_workers(1, 2, 8).with_queue_capacity(64),
        );
        let release = CancellationToken::new();
        bus.subscribe(Blocker(release.clone()));

        for i in 0..32 {
            bus.publish_async(i).unwrap();
        }
        // Let workers pick up their first event
        tokio::task::yield_now().await;
        assert_eq!(bus.stats().target_workers, 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let stats = bus.stats();
        assert!(stats.target_workers > 2, "{stats:?}");
        assert!(stats.target_workers <= 8);

        release.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pool_lowers_target_one_step_per_tick() {
        let bus: EventBus<u32> = EventBus::with_config(
            "test",
            BusConfig::default()
                .with_workers(2, 5, 8)
                .with_scale_interval(Duration::from_millis(100)),
        );
        assert_eq!(bus.stats().target_workers, 5);

        let mut targets = Vec::new();
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            targets.push(bus.stats().target_workers);
        }
        assert_eq!(targets, vec![4, 3, 2, 2, 2]);

        // Running workers are left alone
        let stats = bus.stats();
        assert_eq!(stats.backlog, 0);
        assert_eq!(stats.live_workers, 5);

        bus.close().await;
    }

    #[test]
    fn config_clamps_worker_counts() {
        let config = BusConfig::default().with_workers(0, 50, 4);
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.initial_workers, 4);
    }
}
