//! Session and execution counters.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Registry metrics collector
#[derive(Debug)]
pub struct Metrics {
    // Session lifecycle
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_evicted: AtomicU64,
    compile_failures: AtomicU64,

    // Data movement
    inputs_bound: AtomicU64,
    bytes_uploaded: AtomicU64,

    executions: AtomicU64,
    execution_failures: AtomicU64,

    // Execute latency in nanoseconds, successful runs only
    execute_latency: RwLock<Histogram<u64>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, max one hour in nanoseconds
        let histogram = Histogram::new_with_max(3_600_000_000_000, 3)
            .expect("Failed to create histogram");

        Self {
            sessions_created: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            compile_failures: AtomicU64::new(0),
            inputs_bound: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            execution_failures: AtomicU64::new(0),
            execute_latency: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sessions_evicted(&self, count: usize) {
        self.sessions_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_compile_failure(&self) {
        self.compile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_input_bound(&self) {
        self.inputs_bound.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one execute attempt that uploaded `uploaded` input bytes.
    pub fn record_execution(&self, duration: Duration, uploaded: u64, success: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(uploaded, Ordering::Relaxed);
        if !success {
            self.execution_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.execute_latency.write().saturating_record(nanos);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.execute_latency.read();

        MetricsSnapshot {
            timestamp: Instant::now(),
            uptime: self.start_time.elapsed(),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            inputs_bound: self.inputs_bound.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            execution_failures: self.execution_failures.load(Ordering::Relaxed),
            avg_latency_ns: if histogram.len() > 0 {
                histogram.mean() as u64
            } else {
                0
            },
            p50_latency_ns: histogram.value_at_quantile(0.50),
            p99_latency_ns: histogram.value_at_quantile(0.99),
            max_latency_ns: histogram.max(),
        }
    }

    pub fn reset(&self) {
        self.sessions_created.store(0, Ordering::Relaxed);
        self.sessions_closed.store(0, Ordering::Relaxed);
        self.sessions_evicted.store(0, Ordering::Relaxed);
        self.compile_failures.store(0, Ordering::Relaxed);
        self.inputs_bound.store(0, Ordering::Relaxed);
        self.bytes_uploaded.store(0, Ordering::Relaxed);
        self.executions.store(0, Ordering::Relaxed);
        self.execution_failures.store(0, Ordering::Relaxed);
        self.execute_latency.write().reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub uptime: Duration,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub sessions_evicted: u64,
    pub compile_failures: u64,
    pub inputs_bound: u64,
    pub bytes_uploaded: u64,
    pub executions: u64,
    pub execution_failures: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Sessions created and not yet closed or evicted.
    pub fn live_sessions(&self) -> u64 {
        self.sessions_created
            .saturating_sub(self.sessions_closed + self.sessions_evicted)
    }

    /// Fraction of execute attempts that failed (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        if self.executions == 0 {
            return 0.0;
        }
        self.execution_failures as f64 / self.executions as f64
    }

    pub fn executions_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.executions as f64 / seconds
    }
}
