//! Process-wide `tracing` setup.
//!
//! Call [`init_tracing`] once near process start, in the parent and in every
//! worker process alike. Later calls are no-ops. `RUST_LOG` wins over the
//! configured default filter. Output goes to stderr so that a host's stdout
//! stays free for its own use.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::Settings;

static INIT: OnceLock<bool> = OnceLock::new();

/// Output encoding for log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber. Returns whether this call installed it.
pub fn init_tracing(settings: &Settings) -> bool {
    let mut installed = false;
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
        let registry = tracing_subscriber::registry().with(filter);
        let res = match settings.log_format {
            LogFormat::Text => registry
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
        };
        installed = res.is_ok();
        installed
    });
    installed
}
