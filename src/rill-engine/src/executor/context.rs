//! Execution context shared by every operator of one query.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;

use common_config::ExecutionConfig;
use common_error::RillError;

use super::state::{ExecutionState, wait_cancelled};
use crate::memory::ResourceAllocator;
use crate::metrics::{MetricsSink, OperatorMetrics};
use crate::table::Time;

/// Runtime configuration for execution.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Tables buffered per result stream before the sink blocks.
    pub result_buffer_size: usize,
    /// Whether to collect per-operator metrics.
    pub collect_metrics: bool,
    /// Whether teardown verifies that every allocation was released.
    pub check_leaks: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for RuntimeConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            result_buffer_size: config.result_buffer_size.max(1),
            collect_metrics: config.collect_metrics,
            check_leaks: config.check_leaks,
        }
    }
}

impl RuntimeConfig {
    pub fn with_result_buffer_size(mut self, size: usize) -> Self {
        self.result_buffer_size = size.max(1);
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.collect_metrics = enabled;
        self
    }

    pub fn with_leak_check(mut self, enabled: bool) -> Self {
        self.check_leaks = enabled;
        self
    }
}

/// Context handed to every operator of a running query.
///
/// Cheap to clone; every clone observes the same allocator, state, metrics
/// and cancellation signal.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    allocator: Arc<ResourceAllocator>,
    state: Arc<ExecutionState>,
    cancel_rx: watch::Receiver<bool>,
    metrics: Option<MetricsSink>,
    config: RuntimeConfig,
    now: SystemTime,
}

impl ExecutionContext {
    /// Create a context with a fresh query state.
    pub fn new(allocator: Arc<ResourceAllocator>) -> Self {
        Self::with_state(allocator, Arc::new(ExecutionState::new()))
    }

    /// Create a context bound to an existing query state.
    pub fn with_state(allocator: Arc<ResourceAllocator>, state: Arc<ExecutionState>) -> Self {
        let cancel_rx = state.cancel_handle().subscribe();
        let config = RuntimeConfig::default();
        let metrics = config.collect_metrics.then(MetricsSink::new);
        Self {
            allocator,
            state,
            cancel_rx,
            metrics,
            config,
            now: SystemTime::now(),
        }
    }

    /// Replace the runtime configuration.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.metrics = match (config.collect_metrics, self.metrics.take()) {
            (true, Some(sink)) => Some(sink),
            (true, None) => Some(MetricsSink::new()),
            (false, _) => None,
        };
        self.config = config;
        self
    }

    /// Replace the reference clock value.
    pub fn with_now(mut self, now: SystemTime) -> Self {
        self.now = now;
        self
    }

    /// The query's allocator.
    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }

    /// The query's lifecycle state.
    pub fn state(&self) -> &Arc<ExecutionState> {
        &self.state
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Reference "now" of the query.
    pub fn now(&self) -> SystemTime {
        self.now
    }

    /// Reference "now" as engine time.
    pub fn now_time(&self) -> Time {
        Time::from(self.now)
    }

    /// The metrics sink, if metrics are collected.
    pub fn metrics(&self) -> Option<&MetricsSink> {
        self.metrics.as_ref()
    }

    /// Update the metrics of `id` if metrics are collected.
    pub fn update_metrics<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut OperatorMetrics),
    {
        if let Some(sink) = &self.metrics {
            sink.update(id, f);
        }
    }

    /// A receiver observing query cancellation.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// Check if execution has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolve once the query is cancelled.
    pub async fn cancelled(&self) {
        wait_cancelled(&self.cancel_rx).await;
    }

    /// Error a worker reports when it stops early.
    pub fn terminal_error(&self) -> RillError {
        self.state.terminal_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_toggle() {
        let ctx = ExecutionContext::new(Arc::new(ResourceAllocator::unlimited()));
        assert!(ctx.metrics().is_some());
        ctx.update_metrics("a", |m| m.add_input(3));
        assert_eq!(ctx.metrics().unwrap().get("a").unwrap().rows_in, 3);

        let ctx = ctx.with_config(RuntimeConfig::default().with_metrics(false));
        assert!(ctx.metrics().is_none());
        ctx.update_metrics("a", |m| m.add_input(3));
    }

    #[test]
    fn test_cancellation_visible_through_clones() {
        let ctx = ExecutionContext::new(Arc::new(ResourceAllocator::unlimited()));
        let clone = ctx.clone();
        assert!(!clone.is_cancelled());
        ctx.state().fail(RillError::execution("boom"));
        assert!(clone.is_cancelled());
        assert_eq!(clone.terminal_error().to_string(), "ExecutionError: boom");
    }

    #[test]
    fn test_runtime_config_from_execution_config() {
        let config = ExecutionConfig {
            result_buffer_size: 0,
            check_leaks: true,
            ..ExecutionConfig::default()
        };
        let runtime = RuntimeConfig::from(&config);
        assert_eq!(runtime.result_buffer_size, 1);
        assert!(runtime.check_leaks);
    }
}
