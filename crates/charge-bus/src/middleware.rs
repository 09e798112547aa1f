//! Middleware chain
//!
//! Middleware wraps delivery of a single event to all subscribers. The first
//! middleware registered is the outermost layer: it sees the event first and
//! the result last. A middleware may short-circuit by returning without
//! calling [`Next::run`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::error::{BusError, BusResult};
use crate::subscriber::{Event, Subscriber};

#[async_trait]
pub trait Middleware<T: Event>: Send + Sync {
    async fn handle(&self, event: &T, next: Next<'_, T>) -> BusResult<()>;
}

/// The remainder of the chain below the current middleware
pub struct Next<'a, T: Event> {
    middlewares: &'a [Arc<dyn Middleware<T>>],
    subscribers: &'a [Arc<dyn Subscriber<T>>],
}

impl<'a, T: Event> Next<'a, T> {
    pub(crate) fn new(
        middlewares: &'a [Arc<dyn Middleware<T>>],
        subscribers: &'a [Arc<dyn Subscriber<T>>],
    ) -> Self {
        Self {
            middlewares,
            subscribers,
        }
    }

    /// Run the remaining middleware, then every subscriber in order
    ///
    /// Stops at the first subscriber error.
    pub async fn run(self, event: &T) -> BusResult<()> {
        match self.middlewares.split_first() {
            Some((outer, rest)) => {
                outer
                    .handle(event, Next::new(rest, self.subscribers))
                    .await
            }
            None => {
                for subscriber in self.subscribers {
                    subscriber.handle(event).await?;
                }
                Ok(())
            }
        }
    }
}

/// Logs each dispatched event with its outcome and latency
#[derive(Debug, Clone)]
pub struct LogMiddleware {
    name: String,
}

impl LogMiddleware {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl<T: Event> Middleware<T> for LogMiddleware {
    async fn handle(&self, event: &T, next: Next<'_, T>) -> BusResult<()> {
        let started = Instant::now();
        debug!(bus = %self.name, ?event, "Dispatching event");

        let result = next.run(event).await;
        let elapsed_us = started.elapsed().as_micros() as u64;
        match &result {
            Ok(()) => debug!(bus = %self.name, elapsed_us, "Event handled"),
            Err(e) => warn!(bus = %self.name, elapsed_us, error = %e, "Event handling failed"),
        }
        result
    }
}

/// Converts a panic anywhere below it into [`BusError::Panicked`]
#[derive(Debug, Clone, Default)]
pub struct RecoveryMiddleware;

#[async_trait]
impl<T: Event> Middleware<T> for RecoveryMiddleware {
    async fn handle(&self, event: &T, next: Next<'_, T>) -> BusResult<()> {
        match AssertUnwindSafe(next.run(event)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(panic = %msg, ?event, "Recovered from handler panic");
                Err(BusError::Panicked(msg))
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
