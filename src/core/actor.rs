//! # WorkerActor: supervises one description after its first start.
//!
//! The pool spawns one actor per prepared description. The actor awaits the
//! instance's completion and decides what happens next:
//!
//! ```text
//! loop {
//!   completion ─► roster.finished ─► publish PoolProgress
//!     ├─ Err(ShutdownRequested) ─► publish WorkerStopped, shutdown.set(), retire
//!     ├─ Err(e)                 ─► publish WorkerFailed
//!     └─ Ok(())                 ─► publish WorkerStopped
//!   shutdown set?                           ─► retire
//!   !restart.should_restart(failed)         ─► retire
//!   publish RestartScheduled, sleep restart_backoff.next(n)   (cancelled by shutdown)
//!   prepare() again ─► roster.started
//! }
//! ```
//!
//! Restart decisions are made independently per description, as soon as its
//! instance finishes.

use std::sync::Arc;

use crate::core::prepare::{Instance, prepare};
use crate::core::roster::Roster;
use crate::error::WorkerError;
use crate::events::{Event, EventKind};
use crate::workers::WorkerDescription;
use crate::workers::launcher::LaunchEnv;

pub(crate) struct WorkerActor {
    desc: WorkerDescription,
    env: Arc<LaunchEnv>,
    roster: Arc<Roster>,
}

impl WorkerActor {
    pub(crate) fn new(desc: WorkerDescription, env: Arc<LaunchEnv>, roster: Arc<Roster>) -> Self {
        Self { desc, env, roster }
    }

    /// Supervises `instance` and its successors until the description retires.
    pub(crate) async fn run(self, mut instance: Instance) {
        let mut attempt = instance.attempt;
        let mut restarts: u32 = 0;
        loop {
            let res = instance.completion.await;
            self.report_progress();

            let failed = match res {
                Ok(()) => {
                    self.publish(Event::new(EventKind::WorkerStopped), attempt);
                    false
                }
                Err(WorkerError::ShutdownRequested) => {
                    self.publish(
                        Event::new(EventKind::WorkerStopped).with_reason("shutdown requested"),
                        attempt,
                    );
                    self.env.shutdown.set();
                    return self.retire(attempt, "shutdown requested");
                }
                Err(err) => {
                    self.publish(
                        Event::new(EventKind::WorkerFailed).with_reason(err.to_string()),
                        attempt,
                    );
                    true
                }
            };

            if self.env.shutdown.is_set() {
                return self.retire(attempt, "shutdown");
            }
            if !self.desc.restart().should_restart(failed) {
                return self.retire(attempt, "restart policy");
            }

            let delay = self.env.cfg.restart_backoff.next(restarts);
            restarts = restarts.saturating_add(1);
            self.publish(Event::new(EventKind::RestartScheduled).with_delay(delay), attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.env.shutdown.cancelled() => return self.retire(attempt, "shutdown"),
            }

            instance = match prepare(&self.desc, &self.env, &mut attempt).await {
                Ok(next) => next,
                Err(err) => {
                    if err.is_shutdown() {
                        self.env.shutdown.set();
                    }
                    return self.retire(attempt, "shutdown");
                }
            };
            self.roster.started(self.desc.shared_name(), self.desc.daemon());
        }
    }

    fn report_progress(&self) {
        let progress = self.roster.finished(self.desc.name());
        let working: Vec<&str> = progress.working.iter().map(|n| &**n).collect();
        self.env.bus.publish(
            Event::new(EventKind::PoolProgress)
                .with_worker(self.desc.name())
                .with_attempt(progress.completions)
                .with_reason(format!("finished=[{}] working={working:?}", self.desc.name())),
        );
    }

    fn retire(&self, attempt: u32, reason: &'static str) {
        self.publish(Event::new(EventKind::WorkerRetired).with_reason(reason), attempt);
    }

    fn publish(&self, ev: Event, attempt: u32) {
        self.env
            .bus
            .publish(ev.with_worker(self.desc.name()).with_attempt(attempt));
    }
}
