//! Tracing/logging setup shared by data-layer processes and tests.

/// Initialize process-wide structured logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing subscriber configuration (filters, formatters).
pub mod tracing;

pub use self::tracing::init_for_tests;
