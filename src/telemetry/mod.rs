//! Telemetry for the session registry.
//!
//! Counts session lifecycle events and execute latency, and exports
//! snapshots.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub mod export;

#[cfg(feature = "telemetry")]
pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(feature = "telemetry")]
pub use export::{ConsoleExporter, JsonExporter, MetricsExporter, SerializableSnapshot};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, Default)]
    pub struct Metrics;

    impl Metrics {
        pub fn new() -> Self {
            Self
        }
        pub fn record_session_created(&self) {}
        pub fn record_session_closed(&self) {}
        pub fn record_sessions_evicted(&self, _: usize) {}
        pub fn record_compile_failure(&self) {}
        pub fn record_input_bound(&self) {}
        pub fn record_execution(&self, _: Duration, _: u64, _: bool) {}
        pub fn snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
        pub fn reset(&self) {}
    }

    #[derive(Debug, Clone, Default)]
    pub struct MetricsSnapshot {
        pub timestamp: Option<Instant>,
        pub sessions_created: u64,
        pub sessions_closed: u64,
        pub sessions_evicted: u64,
        pub executions: u64,
        pub execution_failures: u64,
    }

    impl MetricsSnapshot {
        pub fn live_sessions(&self) -> u64 {
            0
        }
    }
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{Metrics, MetricsSnapshot};
