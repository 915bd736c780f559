//! Event subscribers.
//!
//! ```text
//!   Bus ──► event listener ──► SubscriberSet::emit(&Event)
//!                                   │
//!                          ┌────────┼─────────┐
//!                          ▼        ▼         ▼
//!                      LogWriter  custom    custom
//! ```
//!
//! - [`Subscribe`] the extension trait
//! - [`SubscriberSet`] per-subscriber queues and workers
//! - [`LogWriter`] built-in `tracing` renderer, installed by default

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
