//! Structured logging with `tracing`.
//!
//! The channel driver never installs a global subscriber itself; it logs
//! through the [`tracing::Span`] it is given. Binaries call one of the
//! `init_*` functions below once at startup.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Default filter when neither the caller nor `RUST_LOG` supplies one.
pub const DEFAULT_LEVEL: &str = "info";

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with compact stderr output.
///
/// `RUST_LOG` takes precedence over `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails only if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with one JSON object per line on
/// stderr.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .json()
        .with_current_span(true);

    let _ = subscriber.try_init();
}
