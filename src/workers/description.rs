//! # Worker declaration.
//!
//! [`WorkerDescription`] is the immutable declaration of one supervised worker:
//! its entry function, name, execution unit, restart policy and daemon flag.
//! Descriptions are composed once at startup and handed to
//! [`Supervisor::run`](crate::Supervisor::run) as an ordered list.
//!
//! Worker processes rebuild the same list, so it must be composed
//! deterministically (same names, same order) in every process.
//!
//! ## Example
//! ```rust
//! use procvisor::{RestartPolicy, WorkerContext, WorkerDescription, WorkerError, WorkerFn, WorkerKind};
//!
//! let desc = WorkerDescription::new(WorkerFn::arc("http", |ctx: WorkerContext| async move {
//!     ctx.ready().notify();
//!     ctx.shutdown().cancelled().await;
//!     Ok::<_, WorkerError>(())
//! }))
//! .with_kind(WorkerKind::Process)
//! .with_restart(RestartPolicy::OnFailure)
//! .with_daemon(false);
//!
//! assert_eq!(desc.name(), "http");
//! assert!(!desc.daemon());
//! ```

use std::sync::Arc;

use crate::policies::RestartPolicy;
use crate::workers::worker::WorkerRef;

/// Execution unit of a worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WorkerKind {
    /// A child OS process (crash and memory isolation).
    Process,
    /// An OS thread of the orchestrating process with its own event loop.
    #[default]
    Thread,
}

/// Immutable declaration of one supervised worker.
#[derive(Clone)]
pub struct WorkerDescription {
    worker: WorkerRef,
    name: Arc<str>,
    kind: WorkerKind,
    restart: RestartPolicy,
    daemon: bool,
}

impl std::fmt::Debug for WorkerDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDescription")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("restart", &self.restart)
            .field("daemon", &self.daemon)
            .finish()
    }
}

impl WorkerDescription {
    /// A thread worker named after `worker`, restarted always, daemon.
    pub fn new(worker: WorkerRef) -> Self {
        let name = Arc::from(worker.name());
        Self {
            worker,
            name,
            kind: WorkerKind::default(),
            restart: RestartPolicy::default(),
            daemon: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_kind(mut self, kind: WorkerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Daemon workers are bounded by the shutdown grace; others are awaited.
    pub fn with_daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn restart(&self) -> RestartPolicy {
        self.restart
    }

    pub fn daemon(&self) -> bool {
        self.daemon
    }
}
