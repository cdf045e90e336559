//! Metrics export.

use super::metrics::MetricsSnapshot;
use crate::error::Result;
use serde::Serialize;
use std::path::PathBuf;

/// Trait for exporting metrics to different formats
pub trait MetricsExporter: Send + Sync {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Writes snapshots as pretty-printed JSON, replacing the file each time.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    output_path: PathBuf,
}

impl JsonExporter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(&SerializableSnapshot::from(snapshot))?;
        std::fs::write(&self.output_path, json)?;
        Ok(())
    }
}

/// Serializable version of MetricsSnapshot
#[derive(Debug, Clone, Serialize)]
pub struct SerializableSnapshot {
    pub uptime_secs: f64,
    pub live_sessions: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub sessions_evicted: u64,
    pub compile_failures: u64,
    pub inputs_bound: u64,
    pub bytes_uploaded: u64,
    pub executions: u64,
    pub execution_failures: u64,
    pub avg_latency_us: f64,
    pub p50_latency_us: f64,
    pub p99_latency_us: f64,
    pub max_latency_us: f64,
    pub executions_per_second: f64,
}

impl From<&MetricsSnapshot> for SerializableSnapshot {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            uptime_secs: snapshot.uptime.as_secs_f64(),
            live_sessions: snapshot.live_sessions(),
            sessions_created: snapshot.sessions_created,
            sessions_closed: snapshot.sessions_closed,
            sessions_evicted: snapshot.sessions_evicted,
            compile_failures: snapshot.compile_failures,
            inputs_bound: snapshot.inputs_bound,
            bytes_uploaded: snapshot.bytes_uploaded,
            executions: snapshot.executions,
            execution_failures: snapshot.execution_failures,
            avg_latency_us: snapshot.avg_latency_ns as f64 / 1_000.0,
            p50_latency_us: snapshot.p50_latency_ns as f64 / 1_000.0,
            p99_latency_us: snapshot.p99_latency_ns as f64 / 1_000.0,
            max_latency_us: snapshot.max_latency_ns as f64 / 1_000.0,
            executions_per_second: snapshot.executions_per_second(),
        }
    }
}

/// Prints a human readable summary to stdout.
#[derive(Debug, Clone, Default)]
pub struct ConsoleExporter {
    verbose: bool,
}

impl ConsoleExporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MetricsExporter for ConsoleExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        println!("=== Kernel Session Metrics ===");
        println!("Uptime: {:.2}s", snapshot.uptime.as_secs_f64());
        println!(
            "Sessions: {} live ({} created, {} closed, {} evicted)",
            snapshot.live_sessions(),
            snapshot.sessions_created,
            snapshot.sessions_closed,
            snapshot.sessions_evicted
        );
        println!("Compile failures: {}", snapshot.compile_failures);
        println!(
            "Executions: {} ({} failed)",
            snapshot.executions, snapshot.execution_failures
        );

        if self.verbose {
            println!("\nInputs bound: {}", snapshot.inputs_bound);
            println!("Bytes uploaded: {}", snapshot.bytes_uploaded);
            println!("\nExecute latency:");
            println!("  Average: {:.2}μs", snapshot.avg_latency_ns as f64 / 1_000.0);
            println!("  P50: {:.2}μs", snapshot.p50_latency_ns as f64 / 1_000.0);
            println!("  P99: {:.2}μs", snapshot.p99_latency_ns as f64 / 1_000.0);
            println!("  Max: {:.2}μs", snapshot.max_latency_ns as f64 / 1_000.0);
        }

        println!("==============================");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Metrics;
    use std::time::Duration;

    fn sample_snapshot() -> MetricsSnapshot {
        let metrics = Metrics::new();
        metrics.record_session_created();
        metrics.record_input_bound();
        metrics.record_execution(Duration::from_micros(20), 32, true);
        metrics.snapshot()
    }

    #[test]
    fn test_console_exporter() {
        let exporter = ConsoleExporter::new(true);
        assert!(exporter.export(&sample_snapshot()).is_ok());
    }

    #[test]
    fn test_json_exporter() {
        let path = std::env::temp_dir().join(format!(
            "kernel_session_metrics_{}.json",
            std::process::id()
        ));
        let exporter = JsonExporter::new(&path);

        exporter.export(&sample_snapshot()).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["live_sessions"], 1);
        assert_eq!(written["bytes_uploaded"], 32);

        let _ = std::fs::remove_file(&path);
    }
}
