//! # Supervisor runtime configuration.
//!
//! [`SupervisorConfig`] centralizes the knobs of one [`Supervisor`](crate::Supervisor):
//! shutdown grace, event bus capacity, the pause between restarts and between
//! failed startups, and how worker processes are launched.
//!
//! Build it by hand or derive it from [`Settings`] with [`SupervisorConfig::from_settings`].

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::policies::BackoffPolicy;
use crate::settings::Settings;

/// Global configuration of the supervisor runtime.
///
/// ## Field semantics
/// - `grace`: how long daemon workers may take to stop after shutdown (`0s` = terminate at once)
/// - `bus_capacity`: event ring buffer size (min 1)
/// - `restart_backoff`: pause before a finished worker is started again
/// - `startup_backoff`: pause between failed startup attempts
/// - `launcher`: program and arguments of worker processes
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Drain bound for daemon workers. Non-daemon workers are always awaited.
    pub grace: Duration,
    /// Capacity of the event bus.
    pub bus_capacity: usize,
    /// Backoff between restarts of one description (constant 1s by default).
    pub restart_backoff: BackoffPolicy,
    /// Backoff between failed startups of one description (constant 1s by default).
    pub startup_backoff: BackoffPolicy,
    /// How worker processes are spawned.
    pub launcher: ProcessLauncher,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            restart_backoff: BackoffPolicy::default(),
            startup_backoff: BackoffPolicy::default(),
            launcher: ProcessLauncher::default(),
        }
    }
}

impl SupervisorConfig {
    /// Derives grace and backoffs from application settings.
    ///
    /// Restarts may grow and jitter; failed startups always wait the flat pause.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            grace: settings.grace(),
            restart_backoff: BackoffPolicy {
                first: settings.restart_backoff(),
                max: settings.restart_backoff_max().max(settings.restart_backoff()),
                factor: settings.restart_backoff_factor,
                jitter: settings.restart_jitter,
            },
            startup_backoff: BackoffPolicy::constant(settings.restart_backoff()),
            ..Self::default()
        }
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Program and arguments used to start a worker process.
///
/// A worker process runs the same host program again; the host rebuilds its
/// worker descriptions and [`Supervisor::run`](crate::Supervisor::run) hosts only
/// the one it was started for. The default re-executes the current binary with
/// the current arguments.
#[derive(Clone, Debug, Default)]
pub struct ProcessLauncher {
    /// Program to execute; `None` = `std::env::current_exe()`.
    pub program: Option<PathBuf>,
    /// Arguments; `None` = the arguments of the current process.
    pub args: Option<Vec<OsString>>,
}

impl ProcessLauncher {
    /// Launch `program` with `args` instead of re-executing the current binary.
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: Some(program.into()),
            args: Some(args.into_iter().map(Into::into).collect()),
        }
    }

    pub(crate) fn resolve(&self) -> std::io::Result<(PathBuf, Vec<OsString>)> {
        let program = match &self.program {
            Some(p) => p.clone(),
            None => std::env::current_exe()?,
        };
        let args = match &self.args {
            Some(a) => a.clone(),
            None => std::env::args_os().skip(1).collect(),
        };
        Ok((program, args))
    }
}
