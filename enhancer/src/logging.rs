//! Tracing setup for the CLI and services.
//!
//! Diagnostics go to stderr and are filtered by `RUST_LOG`. Run artifacts
//! (pipeline run directories, codex log directories) are written regardless
//! of the filter.

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable single lines (CLI default).
    #[default]
    Compact,
    /// One JSON object per line (services default).
    Json,
}

/// Install the global subscriber.
///
/// Reads `RUST_LOG`; defaults to `default_directive` when unset or invalid.
///
/// # Example
/// ```bash
/// RUST_LOG=enhancer=debug enhancer pipeline run
/// ```
pub fn init(format: LogFormat, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .flatten_event(true)
                    .with_current_span(false),
            )
            .init(),
    }
}
