//! # Spawning worker instances.
//!
//! [`launch`] starts one instance of a [`WorkerDescription`] and hands back a
//! [`Launched`]: a completion future (the instance's join handle plus its
//! one-shot error channel) and a readiness watch.
//!
//! ```text
//! WorkerKind::Thread                      WorkerKind::Process
//!   std::thread "<name>"                    re-exec host program
//!     └─ run_event_loop(worker.run)           env PROCVISOR_IPC_{SOCKET,WORKER,ATTEMPT}
//!          ├─ ready.notify() ─► watch          ├─ Ready{worker,attempt} ─► broker slot ─► watch
//!          └─ result ─► oneshot ─► completion  └─ Failed{..} ─► broker slot
//!                                             child.wait() + slot error ─► completion
//! ```
//!
//! A process's completion resolves to the error it reported over the broker
//! when there is one, otherwise to `Ok` on a successful exit status and
//! [`WorkerError::Exited`] on any other.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use crate::config::SupervisorConfig;
use crate::error::WorkerError;
use crate::events::Bus;
use crate::ipc::{ENV_ATTEMPT, ENV_SOCKET, ENV_WORKER, SharedManager};
use crate::shutdown::ShutdownSignal;
use crate::workers::context::{ReadySignal, WorkerContext};
use crate::workers::description::{WorkerDescription, WorkerKind};
use crate::workers::worker::WorkerRef;

/// How long a finished worker's event loop may take to cancel its leftover tasks.
const LOOP_FINALIZE: Duration = Duration::from_secs(1);

/// Resolves when the instance is gone, with the error it finished with.
pub(crate) type Completion = Pin<Box<dyn Future<Output = Result<(), WorkerError>> + Send>>;

/// Everything needed to start instances; shared by the pool and its actors.
pub(crate) struct LaunchEnv {
    pub shutdown: ShutdownSignal,
    pub bus: Bus,
    pub manager: SharedManager,
    pub cfg: SupervisorConfig,
}

/// A started instance.
pub(crate) struct Launched {
    pub completion: Completion,
    /// Flips to `true` once the instance signalled readiness.
    pub ready: watch::Receiver<bool>,
}

/// Starts one instance of `desc`.
pub(crate) fn launch(desc: &WorkerDescription, attempt: u32, env: &LaunchEnv) -> Result<Launched, WorkerError> {
    match desc.kind() {
        WorkerKind::Thread => launch_thread(desc, attempt, env),
        WorkerKind::Process => launch_process(desc, attempt, env),
    }
}

fn launch_thread(desc: &WorkerDescription, attempt: u32, env: &LaunchEnv) -> Result<Launched, WorkerError> {
    let (ready_tx, ready_rx) = watch::channel(false);
    let ready = ReadySignal::new(move || {
        ready_tx.send_replace(true);
    });
    let ctx = WorkerContext::new(
        desc.shared_name(),
        attempt,
        env.shutdown.clone(),
        ready,
        env.bus.clone(),
    );
    let done = spawn_worker_thread(desc.worker().clone(), ctx, desc.name().to_owned())?;

    Ok(Launched {
        completion: Box::pin(async move {
            done.await.unwrap_or_else(|_| {
                Err(WorkerError::Panicked {
                    info: "worker thread ended without reporting".into(),
                })
            })
        }),
        ready: ready_rx,
    })
}

/// Runs `worker` on a new OS thread inside its own event loop.
///
/// The receiver resolves with the instance's outcome; it is the thread's join
/// handle, so a thread that never returns simply keeps it pending.
pub(crate) fn spawn_worker_thread(
    worker: WorkerRef,
    ctx: WorkerContext,
    thread_name: String,
) -> Result<oneshot::Receiver<Result<(), WorkerError>>, WorkerError> {
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let name: Arc<str> = Arc::from(ctx.name());
            let shutdown = ctx.shutdown().clone();
            info!(
                worker = %name,
                attempt = ctx.attempt(),
                pid = std::process::id(),
                thread = ?std::thread::current().id(),
                "initiating worker"
            );
            let res = crate::event_loop::run_event_loop(&name, &shutdown, LOOP_FINALIZE, move || async move {
                worker.run(ctx).await
            });
            let _ = done_tx.send(res);
        })
        .map_err(|e| WorkerError::Spawn { error: e.to_string() })?;
    Ok(done_rx)
}

fn launch_process(desc: &WorkerDescription, attempt: u32, env: &LaunchEnv) -> Result<Launched, WorkerError> {
    let (broker, socket) = env.manager.broker().ok_or_else(|| WorkerError::Spawn {
        error: format!(
            "worker {:?} runs in a process and needs a broker (use SharedManager::start)",
            desc.name()
        ),
    })?;
    let (program, args) = env
        .cfg
        .launcher
        .resolve()
        .map_err(|e| WorkerError::Spawn { error: e.to_string() })?;

    let mut cmd = tokio::process::Command::new(&program);
    cmd.args(&args)
        .env(ENV_SOCKET, socket)
        .env(ENV_WORKER, desc.name())
        .env(ENV_ATTEMPT, attempt.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(desc.daemon());
    #[cfg(unix)]
    {
        cmd.arg0(format!("procvisor: {}", desc.name()));
        cmd.process_group(0);
    }

    let slot = broker.register_startup(desc.name(), attempt);
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            broker.release_startup(desc.name(), attempt);
            return Err(WorkerError::Spawn {
                error: format!("{}: {e}", program.display()),
            });
        }
    };
    debug!(worker = desc.name(), attempt, pid = child.id(), "worker process spawned");

    let ready = slot.ready_receiver();
    let broker = Arc::clone(broker);
    let name = desc.shared_name();
    let completion = async move {
        let status = child.wait().await;
        let reported = slot.take_error();
        broker.release_startup(&name, attempt);
        match (reported, status) {
            (Some(err), _) => Err(err),
            (None, Ok(status)) if status.success() => Ok(()),
            (None, Ok(status)) => Err(WorkerError::Exited { code: status.code() }),
            (None, Err(e)) => Err(WorkerError::fail(e)),
        }
    };

    Ok(Launched {
        completion: Box::pin(completion),
        ready,
    })
}
