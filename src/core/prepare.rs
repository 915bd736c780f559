//! # Bringing one worker instance up.
//!
//! [`prepare`] starts an instance of a description and returns only once the
//! parent knows whether startup succeeded:
//!
//! ```text
//! loop {
//!   shutdown set?            ─► Err(ShutdownRequested)
//!   attempt += 1, publish WorkerStarting
//!   launch ─► race (biased):
//!     completion first  ─► ready was signalled, or Ok(()) : hand back a finished instance
//!                          Err(e) before ready         : startup failure ─┐
//!     ready             ─► publish WorkerReady, hand back the running instance
//!     shutdown          ─► hand back the instance; the pool drains it
//!   launch error ─────────────────────────────────────┤
//!   ShutdownRequested ─► Err(ShutdownRequested)       │
//!   publish StartupFailed, sleep startup_backoff ◄────┘  (cancelled by shutdown)
//! }
//! ```
//!
//! Startup failures are retried without bound until shutdown is requested.

use tokio::sync::watch;

use crate::error::WorkerError;
use crate::events::{Event, EventKind};
use crate::workers::WorkerDescription;
use crate::workers::launcher::{Completion, LaunchEnv, Launched, launch};

/// A started instance, owned by the pool until it completes.
pub(crate) struct Instance {
    pub attempt: u32,
    pub completion: Completion,
}

enum Startup {
    Finished(Result<(), WorkerError>),
    Ready,
    Interrupted,
}

/// Starts `desc` until an instance is up. `attempt` counts starts of this description.
pub(crate) async fn prepare(
    desc: &WorkerDescription,
    env: &LaunchEnv,
    attempt: &mut u32,
) -> Result<Instance, WorkerError> {
    let mut failures: u32 = 0;
    loop {
        if env.shutdown.is_set() {
            return Err(WorkerError::ShutdownRequested);
        }
        *attempt += 1;
        env.bus.publish(
            Event::new(EventKind::WorkerStarting)
                .with_worker(desc.name())
                .with_attempt(*attempt),
        );

        let error = match launch(desc, *attempt, env) {
            Ok(Launched {
                mut completion,
                mut ready,
            }) => {
                let startup = tokio::select! {
                    biased;
                    res = &mut completion => Startup::Finished(res),
                    _ = readiness(&mut ready) => Startup::Ready,
                    _ = env.shutdown.cancelled() => Startup::Interrupted,
                };
                let became_ready = *ready.borrow();
                match startup {
                    Startup::Finished(Err(error)) if !became_ready => error,
                    Startup::Interrupted => {
                        return Ok(Instance {
                            attempt: *attempt,
                            completion,
                        });
                    }
                    Startup::Ready => {
                        publish_ready(desc, env, *attempt);
                        return Ok(Instance {
                            attempt: *attempt,
                            completion,
                        });
                    }
                    Startup::Finished(res) => {
                        if became_ready {
                            publish_ready(desc, env, *attempt);
                        }
                        return Ok(Instance {
                            attempt: *attempt,
                            completion: Box::pin(async move { res }),
                        });
                    }
                }
            }
            Err(error) => error,
        };

        if error.is_shutdown() {
            return Err(error);
        }

        let delay = env.cfg.startup_backoff.next(failures);
        failures = failures.saturating_add(1);
        env.bus.publish(
            Event::new(EventKind::StartupFailed)
                .with_worker(desc.name())
                .with_attempt(*attempt)
                .with_reason(error.to_string())
                .with_delay(delay),
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = env.shutdown.cancelled() => return Err(WorkerError::ShutdownRequested),
        }
    }
}

fn publish_ready(desc: &WorkerDescription, env: &LaunchEnv, attempt: u32) {
    env.bus.publish(
        Event::new(EventKind::WorkerReady)
            .with_worker(desc.name())
            .with_attempt(attempt),
    );
}

/// Completes once the instance reported readiness; never if it cannot anymore.
async fn readiness(ready: &mut watch::Receiver<bool>) {
    if ready.wait_for(|r| *r).await.is_err() {
        std::future::pending::<()>().await;
    }
}
