//! charge-bus - In-process event buses
//!
//! Two building blocks used by every part of the gateway:
//!
//! - [`EventBus`]: typed publish/subscribe with a middleware chain, a bounded
//!   queue and an auto-scaling pool of worker tasks.
//! - [`ReplyBus`]: request/reply on top of an `EventBus`, matching replies to
//!   requests by correlation id with per-request deadlines.
//!
//! # Dispatch
//!
//! ```text
//!  publish_sync(e) ──────────────────────────────┐
//!                                                ▼
//!  publish_async(e) ─▶ [ bounded queue ] ─▶ worker ─▶ mw[0] ─▶ mw[1] ─▶ … ─▶ S1, S2, … Sn
//!         │  (full)                                  (outermost first)    (fail-fast)
//!         └──────────▶ dedicated task ───────────────┘
//! ```

pub mod bus;
pub mod error;
pub mod middleware;
pub mod reply;
pub mod subscriber;

pub use bus::{BusConfig, BusStats, EventBus};
pub use error::{BusError, BusResult};
pub use middleware::{LogMiddleware, Middleware, Next, RecoveryMiddleware};
pub use reply::{Envelope, ReplyBus, ReplyConfig};
pub use subscriber::{Event, FnSubscriber, Subscriber};
