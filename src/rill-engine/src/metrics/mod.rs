//! Per-operator metrics for query execution.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Metrics for one running dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorMetrics {
    /// Tables received from parents.
    pub tables_in: u64,
    /// Tables forwarded downstream.
    pub tables_out: u64,
    /// Rows received from parents.
    pub rows_in: u64,
    /// Rows forwarded downstream.
    pub rows_out: u64,
    /// Time spent inside the operator.
    pub exec_time: Duration,
    /// Peak bytes the operator held against the allocator.
    pub memory_bytes: usize,
}

impl OperatorMetrics {
    /// Create empty metrics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tables_in: 0,
            tables_out: 0,
            rows_in: 0,
            rows_out: 0,
            exec_time: Duration::new(0, 0),
            memory_bytes: 0,
        }
    }

    /// Count one input table.
    pub fn add_input(&mut self, rows: usize) {
        self.tables_in += 1;
        self.rows_in += rows as u64;
    }

    /// Count one output table.
    pub fn add_output(&mut self, rows: usize) {
        self.tables_out += 1;
        self.rows_out += rows as u64;
    }

    /// Add execution time.
    pub fn add_time(&mut self, duration: Duration) {
        self.exec_time += duration;
    }

    /// Update peak memory.
    pub fn update_memory(&mut self, bytes: usize) {
        self.memory_bytes = self.memory_bytes.max(bytes);
    }

    /// Fraction of input rows forwarded.
    pub fn selectivity(&self) -> f64 {
        if self.rows_in == 0 {
            1.0
        } else {
            self.rows_out as f64 / self.rows_in as f64
        }
    }
}

impl std::fmt::Display for OperatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tables_in={}, tables_out={}, rows_in={}, rows_out={}, time={:?}, memory={}B",
            self.tables_in,
            self.tables_out,
            self.rows_in,
            self.rows_out,
            self.exec_time,
            self.memory_bytes
        )
    }
}

/// Shared sink collecting metrics keyed by dataset id.
#[derive(Debug, Clone, Default)]
pub struct MetricsSink {
    metrics: Arc<RwLock<HashMap<String, OperatorMetrics>>>,
}

impl MetricsSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the metrics of one dataset.
    pub fn update<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut OperatorMetrics),
    {
        let mut guard = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(guard.entry(id.to_string()).or_default());
    }

    /// Metrics of one dataset.
    pub fn get(&self, id: &str) -> Option<OperatorMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Snapshot of every dataset's metrics.
    pub fn all(&self) -> HashMap<String, OperatorMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Total rows received across datasets.
    pub fn total_rows_in(&self) -> u64 {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|m| m.rows_in)
            .sum()
    }

    /// One line per dataset, sorted by id.
    pub fn format_analyze(&self) -> String {
        let metrics = self.all();
        let mut ids: Vec<_> = metrics.keys().collect();
        ids.sort();

        let mut output = String::new();
        for id in ids {
            let _ = writeln!(output, "{id}: {}", metrics[id]);
        }
        if output.is_empty() {
            output.push_str("No metrics collected.\n");
        }
        output
    }
}

/// Timer for measuring operator execution time.
#[derive(Debug)]
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_metrics() {
        let mut metrics = OperatorMetrics::new();
        metrics.add_input(10);
        metrics.add_input(10);
        metrics.add_output(5);
        metrics.update_memory(64);
        metrics.update_memory(32);

        assert_eq!(metrics.tables_in, 2);
        assert_eq!(metrics.rows_out, 5);
        assert_eq!(metrics.memory_bytes, 64);
        assert!((metrics.selectivity() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_sink_update() {
        let sink = MetricsSink::new();
        sink.update("filter/0", |m| m.add_input(100));
        sink.update("filter/0", |m| m.add_input(50));
        sink.update("merge", |m| m.add_input(3));

        assert_eq!(sink.get("filter/0").unwrap().rows_in, 150);
        assert_eq!(sink.total_rows_in(), 153);
        assert!(sink.get("yield").is_none());
    }

    #[test]
    fn test_format_analyze_sorted() {
        let sink = MetricsSink::new();
        assert_eq!(sink.format_analyze(), "No metrics collected.\n");

        sink.update("b", |m| m.add_output(1));
        sink.update("a", |m| m.add_output(2));
        let out = sink.format_analyze();
        assert!(out.starts_with("a: "));
        assert_eq!(out.lines().count(), 2);
    }
}
