//! # Command bus: typed request/response over a shared channel.
//!
//! [`CommandBus`] multiplexes any number of callers onto `workers` command
//! worker instances through one [`SharedChannel`]:
//!
//! ```text
//! send(cmd)                    ─► enqueue {call_id: None, cmd}           (returns at once)
//! send_and_wait_result(cmd)    ─► enqueue {call_id: fresh, cmd}
//!                              ─► wait_result(call_id, call_timeout)   (no timeout in dev mode)
//!                                   ├─ elapsed           ─► BusError::Timeout ("server busy")
//!                                   ├─ Err(CommandError) ─► BusError::Command (unchanged)
//!                                   └─ Ok(value)         ─► decode C::Output, or BusError::ResultType
//! ```
//!
//! The bus does not run anything itself: [`CommandBus::worker_descriptions`]
//! returns the descriptions to hand to the [`Supervisor`](crate::Supervisor),
//! named `<name>_<index>`.
//!
//! The bus must be built the same way in the orchestrator and in worker
//! processes; in a worker process it talks to the orchestrator's channel
//! through the broker.

use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::channel::{ChannelOptions, SharedChannel};
use crate::commands::command::{CallEnvelope, CallId, Command, RawCommand};
use crate::commands::context::CommandHost;
use crate::commands::registry::CommandRegistry;
use crate::commands::worker::CommandWorker;
use crate::error::BusError;
use crate::ipc::SharedManager;
use crate::policies::RestartPolicy;
use crate::settings::Settings;
use crate::workers::{WorkerDescription, WorkerKind};

/// Construction parameters of a [`CommandBus`].
#[derive(Clone, Debug)]
pub struct BusOptions {
    /// Number of command worker instances.
    pub workers: usize,
    /// Channel name and worker name prefix.
    pub name: String,
    /// Execution unit of the workers.
    pub kind: WorkerKind,
    pub restart: RestartPolicy,
    pub daemon: bool,
    /// Default wait of `send_and_wait_result`; `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Development mode: every wait is unbounded, explicit timeouts included.
    pub dev_mode: bool,
    /// How long a worker waits on an empty queue before re-checking shutdown.
    pub poll_interval: Duration,
    pub channel: ChannelOptions,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            name: "command_processor".into(),
            kind: WorkerKind::Process,
            restart: RestartPolicy::Always,
            daemon: true,
            call_timeout: Some(Duration::from_secs(10)),
            dev_mode: false,
            poll_interval: Duration::from_secs(2),
            channel: ChannelOptions::default(),
        }
    }
}

impl BusOptions {
    /// Worker count, timeouts and retention from application settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            workers: settings.command_workers,
            call_timeout: settings.call_timeout(),
            dev_mode: settings.dev_mode,
            poll_interval: settings.poll_interval(),
            channel: ChannelOptions::from_settings(settings),
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
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

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Typed, blocking request/response bus of host `H`. Cheap to clone.
pub struct CommandBus<H: CommandHost> {
    inner: Arc<BusInner<H>>,
}

struct BusInner<H: CommandHost> {
    channel: Arc<dyn SharedChannel>,
    host: Arc<H>,
    registry: CommandRegistry<H>,
    options: BusOptions,
}

impl<H: CommandHost> Clone for CommandBus<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: CommandHost> CommandBus<H> {
    /// Builds a bus on the channel `options.name` of `manager`.
    pub fn new(manager: &SharedManager, host: H, registry: CommandRegistry<H>, options: BusOptions) -> Self {
        let channel = manager.channel(&options.name, options.channel);
        Self::with_channel(channel, host, registry, options)
    }

    /// Builds a bus on an explicit channel.
    pub fn with_channel(
        channel: Arc<dyn SharedChannel>,
        host: H,
        registry: CommandRegistry<H>,
        options: BusOptions,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channel,
                host: Arc::new(host),
                registry,
                options,
            }),
        }
    }

    pub fn options(&self) -> &BusOptions {
        &self.inner.options
    }

    /// One description per command worker, to be run by the supervisor.
    pub fn worker_descriptions(&self) -> Vec<WorkerDescription> {
        let opts = &self.inner.options;
        (0..opts.workers)
            .map(|i| {
                let name = format!("{}_{i}", opts.name);
                let worker = CommandWorker::new(
                    name,
                    Arc::clone(&self.inner.host),
                    self.inner.registry.clone(),
                    Arc::clone(&self.inner.channel),
                    opts.poll_interval,
                );
                WorkerDescription::new(Arc::new(worker))
                    .with_kind(opts.kind)
                    .with_restart(opts.restart)
                    .with_daemon(opts.daemon)
            })
            .collect()
    }

    /// Enqueues `cmd` without waiting for (or producing) a result.
    ///
    /// A failure while executing it crashes the worker that picked it up.
    pub async fn send<C: Command<H>>(&self, cmd: &C) -> Result<(), BusError> {
        let command = self.encode(cmd)?;
        self.inner
            .channel
            .enqueue(CallEnvelope {
                call_id: None,
                command,
            })
            .await?;
        Ok(())
    }

    /// Executes `cmd` on a worker and returns its output, waiting at most the
    /// configured call timeout.
    pub async fn send_and_wait_result<C: Command<H>>(&self, cmd: &C) -> Result<C::Output, BusError> {
        self.send_and_wait_result_with_timeout(cmd, self.inner.options.call_timeout)
            .await
    }

    /// Like [`send_and_wait_result`](Self::send_and_wait_result) with an explicit timeout.
    ///
    /// In dev mode `timeout` is ignored and the call waits for its result.
    pub async fn send_and_wait_result_with_timeout<C: Command<H>>(
        &self,
        cmd: &C,
        timeout: Option<Duration>,
    ) -> Result<C::Output, BusError> {
        let timeout = if self.inner.options.dev_mode { None } else { timeout };
        let command = self.encode(cmd)?;
        let call_id = CallId::new();
        self.inner
            .channel
            .enqueue(CallEnvelope {
                call_id: Some(call_id),
                command,
            })
            .await?;

        let Some(result) = self.inner.channel.wait_result(call_id, timeout).await? else {
            return Err(BusError::Timeout {
                timeout: timeout.unwrap_or_default(),
            });
        };
        let value = result.outcome?;
        serde_json::from_value(value).map_err(|e| BusError::ResultType {
            expected: type_name::<C::Output>(),
            message: e.to_string(),
        })
    }

    /// Number of results on the channel nobody has claimed.
    pub async fn pending_results(&self) -> Result<usize, BusError> {
        Ok(self.inner.channel.pending_results().await?)
    }

    fn encode<C: Command<H>>(&self, cmd: &C) -> Result<RawCommand, BusError> {
        if !self.inner.registry.contains(C::KIND) {
            return Err(BusError::UnknownCommand { kind: C::KIND });
        }
        RawCommand::encode::<H, C>(cmd).map_err(|e| BusError::Encode { message: e.to_string() })
    }
}
