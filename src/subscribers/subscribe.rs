//! # Subscriber trait
//!
//! `Subscribe` is the extension point for plugging event handlers into a
//! process's runtime. Each subscriber is driven by its own worker task fed by a
//! bounded queue owned by the [`SubscriberSet`](crate::SubscriberSet); a slow
//! subscriber never blocks publishers or other subscribers.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use procvisor::{Event, EventKind, Subscribe};
///
/// struct CrashCounter(std::sync::atomic::AtomicUsize);
///
/// #[async_trait]
/// impl Subscribe for CrashCounter {
///     async fn on_event(&self, ev: &Event) {
///         if ev.kind == EventKind::WorkerFailed {
///             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         }
///     }
///     fn name(&self) -> &'static str { "crash-counter" }
/// }
/// ```
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue; events beyond it are dropped.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
