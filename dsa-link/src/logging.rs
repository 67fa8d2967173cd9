//! Process-wide logging setup: a
//! `tracing_subscriber::fmt` layer whose filter defaults from the config's
//! `log-level`, plus a ring-buffered [`dsa_log::UiLogger`] a host
//! application can read from to show recent log lines in its own UI.

use dsa_log::UiLogger;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Installs the process-wide `tracing` subscriber. `level` is the
/// config/CLI `log-level` value (`trace`, `debug`, `info`, `warn`,
/// `error`); an environment-supplied `RUST_LOG` always wins via
/// `EnvFilter::try_from_default_env().unwrap_or_else(...)`.
pub fn init_tracing(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_owned()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Constructs the ring-buffered logger threaded through [`crate::link::Link`]
/// for host UI consumption, independent of the process-wide `tracing`
/// subscriber above. The broadcast side is unused by the link itself but
/// lets an embedding host forward log lines to its own subscribers, e.g. an
/// SSE endpoint in a UI layer.
pub fn ui_logger(capacity: usize) -> UiLogger<String> {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    UiLogger::with_buffer(tx, |entry| entry, capacity)
}
