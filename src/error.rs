//! Error types used by the procvisor runtime, its workers and the command bus.
//!
//! - [`RuntimeError`] errors raised by the orchestration runtime itself.
//! - [`WorkerError`] errors raised by one worker instance (startup or runtime).
//! - [`CommandError`] the serializable error envelope of a command execution.
//! - [`MiddlewareError`] misuse of the per-command middleware result store.
//! - [`BusError`] errors observed by a caller of the command bus.
//! - [`ChannelError`] transport failures of the shared channel.
//!
//! [`WorkerError`] and [`CommandError`] cross process boundaries, so both are
//! plain data (`Serialize + Deserialize + Clone`). A caller receives a value equal
//! to the one produced on the worker side.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// # Errors produced by the procvisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some daemon workers remained stuck and were terminated.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of the workers that did not stop in time.
        stuck: Vec<String>,
    },

    /// The single worker hosted by a child process finished with an error.
    #[error("worker {name:?} failed: {error}")]
    Worker {
        /// Worker name.
        name: String,
        /// The error the worker finished with.
        error: WorkerError,
    },

    /// A child process was asked to host a worker that the description list does not contain.
    #[error("no worker description named {name:?}")]
    UnknownWorker {
        /// Requested worker name.
        name: String,
    },

    /// The shared channel (broker connection) failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Worker { .. } => "runtime_worker_failed",
            RuntimeError::UnknownWorker { .. } => "runtime_unknown_worker",
            RuntimeError::Channel(_) => "runtime_channel",
        }
    }

    /// Process exit code a worker process reports its outcome with.
    ///
    /// - `3` the worker requested a cooperative shutdown;
    /// - `1` any other failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::Worker {
                error: WorkerError::ShutdownRequested,
                ..
            } => EXIT_SHUTDOWN_REQUESTED,
            _ => 1,
        }
    }
}

/// Exit code of a worker process that stopped with [`WorkerError::ShutdownRequested`].
pub const EXIT_SHUTDOWN_REQUESTED: i32 = 3;

/// # Errors produced by a worker instance.
///
/// Where the error surfaces decides how it is handled:
/// - before the worker signalled readiness it is a startup failure, retried by the supervisor;
/// - after readiness it is a runtime failure, handled by the pool per restart policy;
/// - [`WorkerError::ShutdownRequested`] is never retried and sets the shutdown signal.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerError {
    /// Cooperative stop request. Not a failure.
    #[error("shutdown requested")]
    ShutdownRequested,

    /// The worker body returned an error.
    #[error("worker failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The worker body panicked.
    #[error("worker panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// A worker process exited unsuccessfully without reporting an error.
    #[error("worker process exited with code {code:?}")]
    Exited {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
    },

    /// The execution unit could not be spawned.
    #[error("failed to spawn worker: {error}")]
    Spawn {
        /// The underlying error message.
        error: String,
    },
}

impl WorkerError {
    /// Shorthand for [`WorkerError::Fail`].
    pub fn fail(error: impl std::fmt::Display) -> Self {
        WorkerError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::ShutdownRequested => "worker_shutdown_requested",
            WorkerError::Fail { .. } => "worker_failed",
            WorkerError::Panicked { .. } => "worker_panicked",
            WorkerError::Exited { .. } => "worker_exited",
            WorkerError::Spawn { .. } => "worker_spawn_failed",
        }
    }

    /// True for the cooperative stop request.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, WorkerError::ShutdownRequested)
    }
}

/// # Misuse of the per-command middleware result store.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiddlewareError {
    /// A second result of the same type was stored for one command.
    #[error("duplicate middleware result of type {type_name}")]
    Duplicate {
        /// Rust type name of the result.
        type_name: String,
    },

    /// A result type was requested that no middleware produced.
    #[error("missing middleware result of type {type_name}")]
    Missing {
        /// Rust type name of the result.
        type_name: String,
    },
}

/// # Serializable error envelope of a command execution.
///
/// Produced on the worker side and delivered unchanged to the caller of
/// [`CommandBus::send_and_wait_result`](crate::CommandBus::send_and_wait_result).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandError {
    /// `execute` returned an error.
    #[error("{kind}: {message}")]
    Failed {
        /// Caller-meaningful error kind (e.g. `"not_found"`).
        kind: String,
        /// Human-readable message.
        message: String,
        /// Rendered cause chain, outermost first.
        causes: Vec<String>,
    },

    /// A middleware stopped the command before execution.
    #[error("command rejected by middleware {middleware:?}")]
    Rejected {
        /// Name of the rejecting middleware.
        middleware: String,
    },

    /// Middleware result store misuse.
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    /// `execute` (or a middleware) panicked.
    #[error("command panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The local execution context could not be built or entered.
    #[error("execution context failed: {message}")]
    Context {
        /// Human-readable message.
        message: String,
    },

    /// The command or its result could not be (de)serialized, or its kind is not registered.
    #[error("codec error: {message}")]
    Decode {
        /// Human-readable message.
        message: String,
    },
}

impl CommandError {
    /// Builds a [`CommandError::Failed`] without a cause chain.
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        CommandError::Failed {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Builds a [`CommandError::Failed`] from any error, walking its `source()` chain.
    pub fn from_error(kind: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        CommandError::Failed {
            kind: kind.into(),
            message: err.to_string(),
            causes,
        }
    }

    /// Builds a [`CommandError::Context`].
    pub fn context(message: impl std::fmt::Display) -> Self {
        CommandError::Context {
            message: message.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            CommandError::Failed { .. } => "command_failed",
            CommandError::Rejected { .. } => "command_rejected",
            CommandError::Middleware(_) => "command_middleware",
            CommandError::Panicked { .. } => "command_panicked",
            CommandError::Context { .. } => "command_context",
            CommandError::Decode { .. } => "command_decode",
        }
    }
}

/// # Transport failures of a shared channel.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelError {
    /// The broker connection is gone.
    #[error("shared channel disconnected")]
    Disconnected,

    /// I/O or protocol failure talking to the broker.
    #[error("ipc failure: {message}")]
    Ipc {
        /// Human-readable message.
        message: String,
    },
}

impl ChannelError {
    pub(crate) fn ipc(message: impl std::fmt::Display) -> Self {
        ChannelError::Ipc {
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::ipc(err)
    }
}

/// # Errors observed by a caller of the command bus.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// No result arrived within the call timeout.
    #[error("Timeout. Server busy. (waited {timeout:?})")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The command failed on the worker; the envelope is delivered as produced.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The result payload does not decode into the command's declared output type.
    #[error("result is not a {expected}: {message}")]
    ResultType {
        /// Rust type name of the declared output.
        expected: &'static str,
        /// Decoder message.
        message: String,
    },

    /// The command could not be serialized.
    #[error("failed to encode command: {message}")]
    Encode {
        /// Encoder message.
        message: String,
    },

    /// The command kind is not registered with this bus.
    #[error("command kind {kind:?} is not registered")]
    UnknownCommand {
        /// The unregistered kind.
        kind: &'static str,
    },

    /// The shared channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Timeout { .. } => "bus_timeout",
            BusError::Command(_) => "bus_command",
            BusError::ResultType { .. } => "bus_result_type",
            BusError::Encode { .. } => "bus_encode",
            BusError::UnknownCommand { .. } => "bus_unknown_command",
            BusError::Channel(_) => "bus_channel",
        }
    }

    /// True when the caller gave up waiting ("server busy").
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout { .. })
    }
}
