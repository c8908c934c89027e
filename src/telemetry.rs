//! Logging setup
//!
//! Plain `tracing` output to stderr. Validation runs are short-lived and
//! read by a human in CI logs, so there is no exporter.
//!
//! # Example
//!
//! ```no_run
//! use aksprobe::telemetry::init_logging;
//!
//! init_logging();
//! // Logs go to stderr, filtered by RUST_LOG (default: info)
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber
///
/// Uses `RUST_LOG` for filtering. Safe to call from every test: only the
/// first call installs anything.
pub fn init_logging() {
    init_logging_with(DEFAULT_FILTER);
}

/// Like [`init_logging`] with a different fallback filter
pub fn init_logging_with(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_test_writer())
        .try_init();
}
