//! Diagnostics via `tracing`.
//!
//! Logs always go to stderr so that stdout carries only the report.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const LOG_ENV: &str = "AUDIT_LOG";

/// Filter directive used when neither `--verbose` nor `AUDIT_LOG` is set.
pub const DEFAULT_LEVEL: &str = "warn";

pub fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbose: bool) {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false);
    let _ = Registry::default().with(filter(verbose)).with(layer).try_init();
}
