//! Tracing and logging (shared setup).

/// Initialize process-wide tracing from `RUST_LOG` (default `info`) with JSON
/// output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide tracing with an explicit filter and format.
///
/// `RUST_LOG`, when set, still takes precedence over `filter`.
pub fn init_with(filter: &str, json: bool) {
    tracing::init_with(filter, json);
}

/// Subscriber construction (filters, layers).
pub mod tracing;
