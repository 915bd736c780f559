//! Restart and backoff policies.
//!
//! - [`RestartPolicy`] whether a finished worker is started again
//! - [`BackoffPolicy`] how long to wait before the next start
//! - [`JitterPolicy`] randomization on top of the backoff
//!
//! ```text
//! WorkerDescription { restart: RestartPolicy, .. }
//!      └─► core::actor uses:
//!           - restart.should_restart(failed) to decide continue/exit
//!           - cfg.restart_backoff.next(n) to schedule the next start
//! core::prepare uses cfg.startup_backoff.next(n) between failed startups
//! ```

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
