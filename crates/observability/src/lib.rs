//! Tracing, logging, metrics (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Metrics collaborator injected into the monitor components.
pub mod metrics;

pub use metrics::{InMemoryMetrics, LockOutcome, MetricsSnapshot, MonitorMetrics, NoopMetrics};
pub use self::tracing::init_with_filter;
