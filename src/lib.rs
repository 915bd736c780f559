//! # procvisor
//!
//! **procvisor** supervises pools of long-running workers, each on its own
//! thread or in its own OS process, and lets application code call into them
//! through a typed command bus that blocks the caller until the result arrives.
//!
//! Worker processes re-execute the host binary, so the crate is unix-only where
//! processes are involved; thread workers run anywhere tokio does.
//!
//! ## Architecture
//! ```text
//!     ┌───────────────────┐  ┌───────────────────┐  ┌───────────────────┐
//!     │ WorkerDescription │  │ WorkerDescription │  │ CommandBus        │
//!     │ (thread, daemon)  │  │ (process)         │  │ (command workers) │
//!     └─────────┬─────────┘  └─────────┬─────────┘  └─────────┬─────────┘
//!               ▼                      ▼                      ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Supervisor                                                           │
//! │  - prepare: start in order, wait for readiness, retry failed starts  │
//! │  - WorkerActor per description: restart policy + backoff             │
//! │  - grace-bounded drain of daemons on shutdown                        │
//! └──────┬─────────────────────────────┬─────────────────────────────────┘
//!        ▼                             ▼
//!  thread: own current_thread     process: `procvisor: <name>`
//!  runtime (event_loop)           re-exec ─► Supervisor::run hosts one worker
//!        │                             │
//!        └────────── SharedManager ────┘
//!                    unix-socket broker: channels, readiness, ShutdownSignal
//!
//! CommandBus::send_and_wait_result ─► SharedChannel ─► CommandWorker
//!     ◄─────────── ResultEnvelope (call_id) ◄──── middleware ─► handler
//! ```
//!
//! All components publish [`Event`]s on the [`Bus`]; a [`SubscriberSet`] fans
//! them out to [`Subscribe`] implementations ([`LogWriter`] by default).
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Start, restart and drain worker pools.                       | [`Supervisor`], [`WorkerDescription`]       |
//! | **Workers**       | Define workers as functions or trait objects.                | [`Worker`], [`WorkerFn`], [`WorkerContext`] |
//! | **Commands**      | Typed request/response over a shared queue.                  | [`CommandBus`], [`Command`], [`Middleware`] |
//! | **IPC**           | Shared channels and shutdown across the process tree.        | [`SharedManager`], [`ShutdownSignal`]       |
//! | **Policies**      | Restart and backoff strategies.                              | [`RestartPolicy`], [`BackoffPolicy`]        |
//! | **Subscriber API**| Hook into lifecycle and command events.                      | [`Subscribe`], [`LogWriter`]                |
//! | **Configuration** | Layered settings and runtime knobs.                          | [`Settings`], [`SupervisorConfig`]          |
//!
//! ## Example
//! ```rust,no_run
//! use procvisor::{RestartPolicy, SharedManager, Supervisor, SupervisorConfig, WorkerContext,
//!                 WorkerDescription, WorkerError, WorkerFn, WorkerKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SharedManager::start().await?;
//!
//!     let hello = WorkerDescription::new(WorkerFn::arc("hello", |ctx: WorkerContext| async move {
//!         ctx.ready().notify();
//!         println!("hello from attempt {}", ctx.attempt());
//!         Ok::<_, WorkerError>(())
//!     }))
//!     .with_kind(WorkerKind::Thread)
//!     .with_restart(RestartPolicy::Never)
//!     .with_daemon(false);
//!
//!     Supervisor::builder(SupervisorConfig::default())
//!         .with_manager(manager)
//!         .build()
//!         .run(vec![hello])
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::any::Any;

mod commands;
mod config;
mod core;
mod error;
mod event_loop;
mod events;
mod ipc;
mod observability;
mod policies;
mod settings;
mod shutdown;
mod signals;
mod subscribers;
mod workers;

// ---- Public re-exports ----

pub use commands::{
    BusOptions, CallEnvelope, CallId, ChannelOptions, Command, CommandBus, CommandHost, CommandRegistry,
    GlobalSetup, LocalChannel, Middleware, MiddlewareOutcome, MiddlewareResults, MiddlewareSelector,
    MiddlewareValue, RawCommand, ResultEnvelope, Scope, SharedChannel,
};
pub use config::{ProcessLauncher, SupervisorConfig};
pub use core::{AfterAllStarted, Supervisor, SupervisorBuilder};
pub use error::{
    BusError, ChannelError, CommandError, EXIT_SHUTDOWN_REQUESTED, MiddlewareError, RuntimeError, WorkerError,
};
pub use event_loop::run_event_loop;
pub use events::{Bus, Event, EventKind};
pub use ipc::{ENV_ATTEMPT, ENV_SOCKET, ENV_WORKER, SharedManager};
pub use observability::{LogFormat, init_tracing};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use settings::Settings;
pub use shutdown::ShutdownSignal;
pub use signals::{ignore_interrupts, relay_os_signals, wait_for_shutdown_signal};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use workers::{ReadySignal, Worker, WorkerContext, WorkerDescription, WorkerFn, WorkerKind, WorkerRef};

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::panic_message;

    #[test]
    fn panic_payloads_are_rendered() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
