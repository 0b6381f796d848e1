//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

pub fn init() {
    init_with(DEFAULT_FILTER, true);
}

/// Install the global subscriber. Safe to call multiple times (subsequent
/// calls are no-ops).
pub fn init_with(filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    // JSON logs for production, human-readable lines for local runs.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
