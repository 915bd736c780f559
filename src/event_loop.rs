//! # Per-worker event loop lifecycle.
//!
//! Every worker body runs on its own OS thread inside a fresh single-threaded
//! tokio runtime. [`run_event_loop`] owns that runtime from creation to
//! finalization:
//!
//! ```text
//! build current_thread runtime
//!   └─► block_on(body)          (panics captured as WorkerError::Panicked)
//!         ├─ Ok(())                     → log "closed"
//!         ├─ Err(ShutdownRequested)     → shutdown.set(), re-raise
//!         └─ Err(other)                 → log error, re-raise
//!   └─► shutdown_timeout(finalize)      (leftover tasks are cancelled)
//! ```
//!
//! The runtime is finalized on every exit path, so tasks spawned by the worker
//! never outlive its instance for longer than `finalize`.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::shutdown::ShutdownSignal;

/// Runs `body` to completion on a dedicated single-threaded runtime.
///
/// Must be called from a plain OS thread (not from inside another runtime).
pub fn run_event_loop<F, Fut>(
    name: &str,
    shutdown: &ShutdownSignal,
    finalize: Duration,
    body: F,
) -> Result<(), WorkerError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), WorkerError>>,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| WorkerError::Spawn {
            error: format!("event loop for {name}: {e}"),
        })?;

    let res = catch_unwind(AssertUnwindSafe(|| rt.block_on(body()))).unwrap_or_else(|payload| {
        Err(WorkerError::Panicked {
            info: crate::panic_message(payload.as_ref()),
        })
    });

    match &res {
        Ok(()) => {}
        Err(WorkerError::ShutdownRequested) => {
            info!(worker = name, "shutdown requested by worker");
            shutdown.set();
        }
        Err(err) => error!(worker = name, error = %err, label = err.as_label(), "worker error"),
    }

    rt.shutdown_timeout(finalize);
    debug!(worker = name, "event loop closed");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_request_sets_signal_and_is_reraised() {
        let sig = ShutdownSignal::new();
        let res = run_event_loop("w", &sig, Duration::from_millis(10), || async {
            Err(WorkerError::ShutdownRequested)
        });
        assert_eq!(res, Err(WorkerError::ShutdownRequested));
        assert!(sig.is_set());
    }

    #[test]
    fn failure_is_reraised_without_shutdown() {
        let sig = ShutdownSignal::new();
        let res = run_event_loop("w", &sig, Duration::from_millis(10), || async {
            Err(WorkerError::fail("boom"))
        });
        assert_eq!(res, Err(WorkerError::fail("boom")));
        assert!(!sig.is_set());
    }

    #[test]
    fn panic_becomes_worker_error() {
        let sig = ShutdownSignal::new();
        let res = run_event_loop("w", &sig, Duration::from_millis(10), || async {
            if sig.is_set() {
                return Ok(());
            }
            panic!("kaput")
        });
        assert_eq!(
            res,
            Err(WorkerError::Panicked {
                info: "kaput".into()
            })
        );
    }

    #[test]
    fn leftover_tasks_do_not_block_finalization() {
        let sig = ShutdownSignal::new();
        let res = run_event_loop("w", &sig, Duration::from_millis(10), || async {
            tokio::spawn(std::future::pending::<()>());
            Ok(())
        });
        assert!(res.is_ok());
    }
}
