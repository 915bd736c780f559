//! # OS signal handling.
//!
//! - [`wait_for_shutdown_signal`] completes on SIGINT, SIGTERM or SIGQUIT (Ctrl-C elsewhere).
//! - [`relay_os_signals`] turns the first such signal into [`ShutdownSignal::set`].
//! - [`ignore_interrupts`] makes a worker process deaf to terminal interrupts, so
//!   only the orchestrator reacts to Ctrl-C and shuts the tree down in order.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::shutdown::ShutdownSignal;

/// Waits for a termination signal.
///
/// Returns `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Spawns a task that sets `shutdown` on the first termination signal.
///
/// The task also ends when `shutdown` is set by anyone else.
pub fn relay_os_signals(shutdown: ShutdownSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            res = wait_for_shutdown_signal() => match res {
                Ok(()) => {
                    info!("termination signal received, shutting down");
                    shutdown.set();
                }
                Err(err) => warn!(error = %err, "cannot listen for termination signals"),
            },
            _ = shutdown.cancelled() => {}
        }
    })
}

/// Swallows SIGINT for the rest of the process lifetime.
///
/// Registering a tokio listener replaces the default disposition; the listener
/// is drained in the background and never acted upon.
#[cfg(unix)]
pub fn ignore_interrupts() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::interrupt()) {
        Ok(mut sigint) => {
            tokio::spawn(async move { while sigint.recv().await.is_some() {} });
        }
        Err(err) => warn!(error = %err, "cannot ignore SIGINT in worker process"),
    }
}

#[cfg(not(unix))]
pub fn ignore_interrupts() {}
