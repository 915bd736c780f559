//! # Application settings.
//!
//! [`Settings`] is loaded with the `config` crate from two layered sources:
//! 1. an optional `procvisor.{toml,yaml,json}` file in the working directory
//!    (or an explicit path via [`Settings::load_from`]);
//! 2. `PROCVISOR_*` environment variables, e.g. `PROCVISOR_COMMAND_WORKERS=4`.
//!
//! Every field has a default, so an empty environment yields a working setup.
//! Worker processes re-read the same sources and therefore agree with the parent.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::observability::LogFormat;
use crate::policies::JitterPolicy;

/// Settings consumed by the runtime and the command bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logical service name (process titles, logs).
    pub service_name: String,
    /// Development mode: call timeouts are disabled.
    pub dev_mode: bool,
    /// Number of command worker instances.
    pub command_workers: usize,
    /// Default `send_and_wait_result` timeout.
    pub call_timeout_ms: u64,
    /// Queue poll interval of command workers (bounds shutdown latency).
    pub poll_interval_ms: u64,
    /// Age after which an unclaimed result is dropped.
    pub result_ttl_ms: u64,
    /// Upper bound of unclaimed results kept per channel.
    pub max_pending_results: usize,
    /// Pause before restarting a finished worker and between failed startups.
    pub restart_backoff_ms: u64,
    /// Growth of the restart pause per restart of the same worker (`1.0` = constant).
    pub restart_backoff_factor: f64,
    /// Cap of the grown restart pause.
    pub restart_backoff_max_ms: u64,
    /// Randomization of the restart pause: `none`, `full`, `equal` or `decorrelated`.
    pub restart_jitter: JitterPolicy,
    /// Drain bound for daemon workers on shutdown.
    pub grace_ms: u64,
    /// Log encoding.
    pub log_format: LogFormat,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_name: "procvisor".into(),
            dev_mode: false,
            command_workers: 2,
            call_timeout_ms: 10_000,
            poll_interval_ms: 2_000,
            result_ttl_ms: 60_000,
            max_pending_results: 1024,
            restart_backoff_ms: 1_000,
            restart_backoff_factor: 1.0,
            restart_backoff_max_ms: 30_000,
            restart_jitter: JitterPolicy::None,
            grace_ms: 60_000,
            log_format: LogFormat::Text,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    /// Loads `procvisor.*` (if present) overlaid with `PROCVISOR_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name("procvisor").required(false))
    }

    /// Loads an explicit settings file overlaid with `PROCVISOR_*` variables.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("PROCVISOR").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Call timeout, or `None` in development mode.
    pub fn call_timeout(&self) -> Option<Duration> {
        if self.dev_mode {
            None
        } else {
            Some(Duration::from_millis(self.call_timeout_ms))
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_millis(self.result_ttl_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn restart_backoff_max(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_max_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}
