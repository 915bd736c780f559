//! # Shared manager: the process tree's shared state.
//!
//! [`SharedManager`] is created once per process before anything else and
//! provides the shutdown signal and the named shared channels.
//!
//! | Role       | Created by                  | Channels          | Process workers |
//! |------------|-----------------------------|-------------------|-----------------|
//! | broker     | `start()` in the orchestrator | owned, served on a socket | yes |
//! | child      | `start()` in a worker process | proxied to the broker     | -   |
//! | in-process | `in_process()`              | owned, not served | no (spawn fails) |
//!
//! A worker process is recognised by the `PROCVISOR_IPC_*` variables its
//! parent sets; in that role [`Supervisor::run`](crate::Supervisor::run) hosts
//! only the worker named by `PROCVISOR_IPC_WORKER`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::commands::{ChannelOptions, SharedChannel};
use crate::error::{ChannelError, WorkerError};
use crate::ipc::broker::{Broker, BrokerState};
use crate::ipc::client::{Client, RemoteChannel};
use crate::ipc::wire::Request;
use crate::ipc::{ENV_ATTEMPT, ENV_SOCKET, ENV_WORKER};
use crate::shutdown::ShutdownSignal;

/// Handle to the process tree's shared state. Cheap to clone.
#[derive(Clone)]
pub struct SharedManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    shutdown: ShutdownSignal,
    role: Role,
}

enum Role {
    InProcess { state: Arc<BrokerState> },
    Broker { state: Arc<BrokerState>, broker: Broker },
    Child { client: Arc<Client>, identity: ChildIdentity },
}

/// The instance a worker process was started for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChildIdentity {
    pub worker: String,
    pub attempt: u32,
}

impl ChildIdentity {
    fn from_env() -> Option<(PathBuf, Self)> {
        let socket = std::env::var_os(ENV_SOCKET)?;
        let worker = std::env::var(ENV_WORKER).ok()?;
        let attempt = std::env::var(ENV_ATTEMPT).ok()?.parse().ok()?;
        Some((PathBuf::from(socket), Self { worker, attempt }))
    }
}

impl std::fmt::Debug for SharedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match &self.inner.role {
            Role::InProcess { .. } => "in_process",
            Role::Broker { .. } => "broker",
            Role::Child { .. } => "child",
        };
        f.debug_struct("SharedManager")
            .field("role", &role)
            .field("shutdown", &self.inner.shutdown)
            .finish()
    }
}

impl SharedManager {
    /// Connects to the parent's broker in a worker process, otherwise starts a broker.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start() -> Result<Self, ChannelError> {
        match ChildIdentity::from_env() {
            Some((socket, identity)) => Self::connect(&socket, identity).await,
            None => Self::serve(),
        }
    }

    /// Starts a broker for this process and its future worker processes.
    pub fn serve() -> Result<Self, ChannelError> {
        let shutdown = ShutdownSignal::new();
        let state = Arc::new(BrokerState::new(shutdown.clone()));
        let broker = Broker::bind(Arc::clone(&state))?;
        Ok(Self::with_role(shutdown, Role::Broker { state, broker }))
    }

    /// A manager for thread workers only; nothing is served.
    pub fn in_process() -> Self {
        let shutdown = ShutdownSignal::new();
        let state = Arc::new(BrokerState::new(shutdown.clone()));
        Self::with_role(shutdown, Role::InProcess { state })
    }

    async fn connect(socket: &Path, identity: ChildIdentity) -> Result<Self, ChannelError> {
        let shutdown = ShutdownSignal::new();
        let client = Client::connect(socket, shutdown.clone()).await?;
        let relay = Arc::clone(&client);
        shutdown.set_relay(move || relay.notify(Request::Shutdown));
        info!(
            worker = %identity.worker,
            attempt = identity.attempt,
            pid = std::process::id(),
            "worker process connected to broker"
        );
        Ok(Self::with_role(shutdown, Role::Child { client, identity }))
    }

    fn with_role(shutdown: ShutdownSignal, role: Role) -> Self {
        Self {
            inner: Arc::new(ManagerInner { shutdown, role }),
        }
    }

    /// The shutdown signal of the process tree.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.inner.shutdown.clone()
    }

    /// The shared channel `name`; `options` apply when this call creates it.
    ///
    /// In a worker process the options of the orchestrator's channel apply.
    pub fn channel(&self, name: &str, options: ChannelOptions) -> Arc<dyn SharedChannel> {
        match &self.inner.role {
            Role::InProcess { state } | Role::Broker { state, .. } => state.channel(name, options),
            Role::Child { client, .. } => Arc::new(RemoteChannel::new(Arc::clone(client), name)),
        }
    }

    /// Whether this process was started as a worker process.
    pub fn is_child(&self) -> bool {
        matches!(self.inner.role, Role::Child { .. })
    }

    pub(crate) fn child_identity(&self) -> Option<&ChildIdentity> {
        match &self.inner.role {
            Role::Child { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// The broker state and socket, when this process serves one.
    pub(crate) fn broker(&self) -> Option<(&Arc<BrokerState>, &Path)> {
        match &self.inner.role {
            Role::Broker { state, broker } => Some((state, broker.path())),
            _ => None,
        }
    }

    /// Tells the parent that the hosted worker is ready.
    pub(crate) fn report_ready(&self) {
        if let Role::Child { client, identity } = &self.inner.role {
            client.notify(Request::Ready {
                worker: identity.worker.clone(),
                attempt: identity.attempt,
            });
        }
    }

    /// Hands the hosted worker's error to the parent and waits for the acknowledgement.
    pub(crate) async fn report_failure(&self, error: WorkerError) {
        if let Role::Child { client, identity } = &self.inner.role {
            let request = Request::Failed {
                worker: identity.worker.clone(),
                attempt: identity.attempt,
                error,
            };
            if let Err(err) = client.call(request).await {
                debug!(error = %err, "cannot report worker failure");
            }
        }
    }
}
