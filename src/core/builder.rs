use std::sync::Arc;

use crate::config::SupervisorConfig;
use crate::ipc::SharedManager;
use crate::subscribers::{LogWriter, Subscribe};

use super::supervisor::{AfterAllStarted, Supervisor};

/// Builder for constructing a [`Supervisor`].
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    subscribers: Option<Vec<Arc<dyn Subscribe>>>,
    manager: Option<SharedManager>,
    after_all_started: Option<AfterAllStarted>,
    os_signals: bool,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            subscribers: None,
            manager: None,
            after_all_started: None,
            os_signals: false,
        }
    }

    /// Replaces the default subscribers (a single [`LogWriter`]).
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = Some(subscribers);
        self
    }

    /// Uses `manager` for shared channels, the shutdown signal and worker processes.
    ///
    /// Without one the supervisor runs in-process: process workers cannot be launched.
    pub fn with_manager(mut self, manager: SharedManager) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Runs `f` once every worker description signalled readiness.
    ///
    /// Not called when shutdown is requested while workers are still starting.
    pub fn after_all_started(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_all_started = Some(Arc::new(f));
        self
    }

    /// Turns SIGINT/SIGTERM/SIGQUIT into a shutdown request while the pool runs.
    pub fn with_os_signals(mut self, enabled: bool) -> Self {
        self.os_signals = enabled;
        self
    }

    /// Builds the supervisor.
    pub fn build(self) -> Supervisor {
        let subscribers = self
            .subscribers
            .unwrap_or_else(|| vec![Arc::new(LogWriter::default()) as Arc<dyn Subscribe>]);
        let manager = self.manager.unwrap_or_else(SharedManager::in_process);
        Supervisor::new_internal(
            self.cfg,
            subscribers,
            manager,
            self.after_all_started,
            self.os_signals,
        )
    }
}
