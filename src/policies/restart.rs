//! # Restart policies for supervised workers.
//!
//! [`RestartPolicy`] decides whether a worker instance is started again after it finishes.
//!
//! | finished with            | `Never` | `OnFailure` | `Always` |
//! |--------------------------|---------|-------------|----------|
//! | clean exit               | stop    | stop        | restart  |
//! | error                    | stop    | restart     | restart  |
//! | shutdown request         | stop    | stop        | stop     |
//!
//! A restart is never scheduled once the shutdown signal is set.

use serde::{Deserialize, Serialize};

/// Policy controlling whether a worker is restarted after it finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Run once; never restart.
    Never,
    /// Restart only when the instance finished with an error.
    OnFailure,
    /// Restart after every finish (default, long-running services).
    #[default]
    Always,
}

impl RestartPolicy {
    /// Whether an instance that finished (`failed` or clean) should be started again.
    ///
    /// Shutdown requests are not failures; callers filter them out before asking.
    pub fn should_restart(&self, failed: bool) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => failed,
            RestartPolicy::Always => true,
        }
    }
}
