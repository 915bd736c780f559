//! # Supervisor: runs a pool of worker descriptions until shutdown.
//!
//! The [`Supervisor`] owns the event bus, the subscriber fan-out and the
//! runtime configuration. [`Supervisor::run`] behaves differently per process:
//!
//! ```text
//! orchestrator (broker / in-process manager)
//!   relay OS signals ─► ShutdownSignal
//!   publish WorkersStarting
//!   for desc in order: prepare(desc) ─► roster     (stop early on shutdown)
//!   shutdown during preparation? ─► skip the callback, drain what was prepared
//!   otherwise: publish AllStarted, after_all_started()
//!   spawn WorkerActor per instance ─► JoinSet (daemon) / JoinSet (non-daemon)
//!   select:
//!     all actors retired ─► Ok(())
//!     shutdown           ─► publish ShutdownRequested
//!                           await non-daemon actors (unbounded)
//!                           await daemon actors within grace
//!                             ├─ in time  ─► publish AllStoppedWithin, Ok(())
//!                             └─ exceeded ─► abort them (processes killed), publish GraceExceeded,
//!                                            Err(GraceExceeded { stuck })
//!
//! worker process (child manager)
//!   ignore SIGINT; find the description named PROCVISOR_IPC_WORKER
//!   run it on a dedicated thread; readiness and errors go to the parent over the broker
//!   Ok(()) or Err(RuntimeError::Worker { .. }) → exit code via RuntimeError::exit_code
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use procvisor::{SharedManager, Supervisor, SupervisorConfig, WorkerContext, WorkerDescription, WorkerError, WorkerFn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SharedManager::start().await?;
//!     let sup = Supervisor::builder(SupervisorConfig::default())
//!         .with_manager(manager)
//!         .with_os_signals(true)
//!         .build();
//!
//!     let heartbeat = WorkerDescription::new(WorkerFn::arc("heartbeat", |ctx: WorkerContext| async move {
//!         ctx.ready().notify();
//!         ctx.shutdown().cancelled().await;
//!         Ok::<_, WorkerError>(())
//!     }));
//!
//!     sup.run(vec![heartbeat]).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SupervisorConfig;
use crate::core::actor::WorkerActor;
use crate::core::builder::SupervisorBuilder;
use crate::core::prepare::prepare;
use crate::core::roster::Roster;
use crate::error::{RuntimeError, WorkerError};
use crate::events::{Bus, Event, EventKind};
use crate::ipc::SharedManager;
use crate::shutdown::ShutdownSignal;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::workers::launcher::{LaunchEnv, spawn_worker_thread};
use crate::workers::{ReadySignal, WorkerContext, WorkerDescription};

/// Callback invoked once every description has been prepared.
pub type AfterAllStarted = Arc<dyn Fn() + Send + Sync>;

/// Coordinates worker supervision, event delivery and graceful shutdown.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    manager: SharedManager,
    after_all_started: Option<AfterAllStarted>,
    os_signals: bool,
}

impl Supervisor {
    /// Starts building a supervisor with `cfg`.
    pub fn builder(cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        subscribers: Vec<Arc<dyn Subscribe>>,
        manager: SharedManager,
        after_all_started: Option<AfterAllStarted>,
        os_signals: bool,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self {
            cfg,
            bus,
            subscribers,
            manager,
            after_all_started,
            os_signals,
        }
    }

    /// The event bus of this process.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The process tree's shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.manager.shutdown_signal()
    }

    pub fn manager(&self) -> &SharedManager {
        &self.manager
    }

    /// Runs `descriptions` until every one retired or shutdown drained them.
    ///
    /// In a worker process only the description this process was started for runs.
    pub async fn run(&self, descriptions: Vec<WorkerDescription>) -> Result<(), RuntimeError> {
        let (stop_listener, listener) = self.spawn_listener();
        let res = match self.manager.child_identity() {
            Some(identity) => {
                let (name, attempt) = (identity.worker.clone(), identity.attempt);
                self.run_child(&name, attempt, descriptions).await
            }
            None => self.run_pool(descriptions).await,
        };
        stop_listener.cancel();
        let _ = listener.await;
        res
    }

    async fn run_pool(&self, descriptions: Vec<WorkerDescription>) -> Result<(), RuntimeError> {
        let shutdown = self.manager.shutdown_signal();
        let signals = self.os_signals.then(|| crate::signals::relay_os_signals(shutdown.clone()));
        let env = Arc::new(LaunchEnv {
            shutdown: shutdown.clone(),
            bus: self.bus.clone(),
            manager: self.manager.clone(),
            cfg: self.cfg.clone(),
        });
        let roster = Arc::new(Roster::default());

        self.bus.publish(
            Event::new(EventKind::WorkersStarting)
                .with_attempt(u32::try_from(descriptions.len()).unwrap_or(u32::MAX)),
        );
        let mut prepared = Vec::with_capacity(descriptions.len());
        for desc in descriptions {
            let mut attempt = 0;
            match prepare(&desc, &env, &mut attempt).await {
                Ok(instance) => {
                    roster.started(desc.shared_name(), desc.daemon());
                    prepared.push((desc, instance));
                }
                Err(_) => break,
            }
            if shutdown.is_set() {
                break;
            }
        }

        if !shutdown.is_set() {
            self.bus.publish(Event::new(EventKind::AllStarted));
            if let Some(callback) = &self.after_all_started {
                callback();
            }
        }

        let mut daemons = JoinSet::new();
        let mut others = JoinSet::new();
        for (desc, instance) in prepared {
            let set = if desc.daemon() { &mut daemons } else { &mut others };
            let actor = WorkerActor::new(desc, Arc::clone(&env), Arc::clone(&roster));
            set.spawn(actor.run(instance));
        }

        let res = self
            .drive_shutdown(&shutdown, &roster, &mut daemons, &mut others)
            .await;
        if let Some(signals) = signals {
            signals.abort();
        }
        res
    }

    /// Waits until every actor retired, or drains them once shutdown is requested.
    async fn drive_shutdown(
        &self,
        shutdown: &ShutdownSignal,
        roster: &Roster,
        daemons: &mut JoinSet<()>,
        others: &mut JoinSet<()>,
    ) -> Result<(), RuntimeError> {
        let all_retired = async {
            while others.join_next().await.is_some() {}
            while daemons.join_next().await.is_some() {}
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {}
            _ = all_retired => return Ok(()),
        }

        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        let grace = self.cfg.grace;
        let drain_others = async { while others.join_next().await.is_some() {} };
        let drain_daemons = tokio::time::timeout(grace, async {
            while daemons.join_next().await.is_some() {}
        });
        let ((), drained) = tokio::join!(drain_others, drain_daemons);

        match drained {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck = roster.working_daemons();
                daemons.abort_all();
                while daemons.join_next().await.is_some() {}
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")));
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    async fn run_child(
        &self,
        name: &str,
        attempt: u32,
        descriptions: Vec<WorkerDescription>,
    ) -> Result<(), RuntimeError> {
        crate::signals::ignore_interrupts();
        let desc = descriptions
            .into_iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| RuntimeError::UnknownWorker { name: name.to_owned() })?;

        let manager = self.manager.clone();
        let ready = ReadySignal::new(move || manager.report_ready());
        let ctx = WorkerContext::new(
            desc.shared_name(),
            attempt,
            self.manager.shutdown_signal(),
            ready,
            self.bus.clone(),
        );
        info!(worker = name, attempt, pid = std::process::id(), "hosting worker process");

        let outcome = match spawn_worker_thread(desc.worker().clone(), ctx, format!("m_{name}")) {
            Ok(done) => done.await.unwrap_or_else(|_| {
                Err(WorkerError::Panicked {
                    info: "worker thread ended without reporting".into(),
                })
            }),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(error) => {
                self.manager.report_failure(error.clone()).await;
                Err(RuntimeError::Worker {
                    name: name.to_owned(),
                    error,
                })
            }
        }
    }

    /// Forwards bus events to the subscribers until stopped, then flushes them.
    fn spawn_listener(&self) -> (CancellationToken, JoinHandle<()>) {
        let mut rx = self.bus.subscribe();
        let set = SubscriberSet::new(self.subscribers.clone(), self.bus.clone());
        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = stopped.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => set.emit(&ev),
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        });
        (stop, handle)
    }
}
