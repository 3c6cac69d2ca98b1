//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; binaries and test harnesses
//! decide where they go by calling [`init_tracing`] once.

use crate::result::{VistazoError, VistazoResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Initialize the global subscriber
///
/// `RUST_LOG` takes precedence over `log_level` when set. Fails if the
/// directive cannot be parsed or a subscriber is already installed.
pub fn init_tracing(log_level: &str, format: LogFormat) -> VistazoResult<()> {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
    let filter = parse_filter(&directive)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| VistazoError::invalid_config(format!("cannot install tracing subscriber: {e}")))
}

fn parse_filter(directive: &str) -> VistazoResult<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| VistazoError::invalid_config(format!("invalid log filter {directive:?}: {e}")))
}
