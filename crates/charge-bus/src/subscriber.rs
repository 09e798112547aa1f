//! Subscriber trait and closure adapter

use std::fmt;

use async_trait::async_trait;

use crate::error::BusResult;

/// Anything that can travel over a bus
pub trait Event: fmt::Debug + Send + Sync + 'static {}

impl<T> Event for T where T: fmt::Debug + Send + Sync + 'static {}

/// Receives every event published on the bus it is subscribed to
///
/// Subscribers run in subscription order. Returning an error stops the
/// remaining subscribers for that event.
#[async_trait]
pub trait Subscriber<T: Event>: Send + Sync {
    async fn handle(&self, event: &T) -> BusResult<()>;
}

/// Adapts a plain closure into a [`Subscriber`]
///
/// ```ignore
/// bus.subscribe(FnSubscriber::new(|cmd: &Command| {
///     tracing::info!(?cmd, "command seen");
///     Ok(())
/// }));
/// ```
pub struct FnSubscriber<F> {
    func: F,
}

impl<F> FnSubscriber<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<T, F> Subscriber<T> for FnSubscriber<F>
where
    T: Event,
    F: Fn(&T) -> BusResult<()> + Send + Sync,
{
    async fn handle(&self, event: &T) -> BusResult<()> {
        (self.func)(event)
    }
}
