//! # Logging subscriber.
//!
//! [`LogWriter`] renders runtime events as `tracing` records with structured
//! fields. Failures are logged at `error`, restarts and rejections at `warn`,
//! lifecycle at `info` and per-command timing at `debug`.
//!
//! ```text
//! INFO  worker starting worker=command_processor_0 attempt=1
//! ERROR worker failed worker=command_processor_0 attempt=1 reason="worker failed: boom"
//! WARN  restart scheduled worker=command_processor_0 attempt=1 delay_ms=1000
//! INFO  pool progress worker=heartbeat counter=3 reason="finished=[heartbeat] working=[..]"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        let attempt = e.attempt.unwrap_or(0);

        match e.kind {
            EventKind::SubscriberPanicked => error!(subscriber = worker, reason, "subscriber panicked"),
            EventKind::SubscriberOverflow => warn!(subscriber = worker, reason, "subscriber dropped event"),
            EventKind::WorkersStarting => info!(count = attempt, "starting workers"),
            EventKind::AllStarted => info!("all workers started"),
            EventKind::PoolProgress => info!(worker, counter = attempt, reason, "pool progress"),
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all workers stopped within grace"),
            EventKind::GraceExceeded => error!(stuck = reason, "grace exceeded"),
            EventKind::WorkerStarting => info!(worker, attempt, "worker starting"),
            EventKind::WorkerReady => info!(worker, attempt, "worker ready"),
            EventKind::StartupFailed => error!(
                worker,
                attempt,
                reason,
                delay_ms = e.delay_ms,
                "prepare worker failed"
            ),
            EventKind::WorkerStopped => info!(worker, attempt, "worker stopped"),
            EventKind::WorkerFailed => error!(worker, attempt, reason, "worker failed"),
            EventKind::RestartScheduled => {
                warn!(worker, attempt, delay_ms = e.delay_ms, "restart scheduled")
            }
            EventKind::WorkerRetired => info!(worker, attempt, reason, "worker retired"),
            EventKind::CommandHandled => debug!(
                worker,
                command = e.command.as_deref(),
                call_id = e.call_id.as_deref(),
                elapsed_ms = e.elapsed_ms,
                "command handled"
            ),
            EventKind::CommandFailed => warn!(
                worker,
                command = e.command.as_deref(),
                call_id = e.call_id.as_deref(),
                elapsed_ms = e.elapsed_ms,
                reason,
                "command failed"
            ),
            EventKind::CommandRejected => warn!(
                worker,
                command = e.command.as_deref(),
                call_id = e.call_id.as_deref(),
                middleware = reason,
                "command rejected"
            ),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
