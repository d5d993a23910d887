//! Logging setup utilities for the Parley binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, colored output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Initialize the tracing subscriber with the specified default log level.
///
/// `crates` lists the crate/binary targets that receive `default_log_level`
/// (e.g. `["parley_server", "parley_server::bin"]`). The filter can be
/// overridden with the `RUST_LOG` environment variable.
///
/// # Examples
///
/// ```no_run
/// use parley_shared::logger::{LogFormat, setup_logger};
///
/// setup_logger(&["parley_server"], "debug", LogFormat::Pretty);
/// ```
pub fn setup_logger(crates: &[&str], default_log_level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        crates
            .iter()
            .map(|name| format!("{}={}", name.replace('-', "_"), default_log_level))
            .collect::<Vec<_>>()
            .join(",")
            .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
