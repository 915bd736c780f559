//! Runtime core: bringing worker pools up, keeping them up, taking them down.
//!
//! The only public API from this module is [`Supervisor`] and its builder.
//!
//! Internal modules:
//! - [`prepare`]: starts one instance and waits for readiness, retrying failed startups;
//! - [`actor`]: supervises one description with its restart policy and backoff;
//! - [`roster`]: tracks running instances for progress events and the grace check;
//! - [`supervisor`]: orchestrates the pool, the child mode and graceful shutdown.

mod actor;
mod builder;
mod prepare;
mod roster;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use supervisor::{AfterAllStarted, Supervisor};
