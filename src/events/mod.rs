//! Runtime events: types and broadcast bus.
//!
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! Publishers are the pool (`core::supervisor`), the per-worker actors and
//! startup loop (`core::actor`, `core::prepare`), command workers
//! (`commands::worker`) and the subscriber workers themselves. The only consumer
//! is the supervisor's event listener, which fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
