//! Configuration management for Rill.
//!
//! Provides the query-level resource specification and execution settings
//! consumed by the executor.

use common_error::{RillError, RillResult};
use serde::{Deserialize, Serialize};

/// Global Rill configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RillConfig {
    /// Execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl RillConfig {
    /// Parse a configuration from JSON. Missing sections fall back to defaults.
    pub fn from_json_str(json: &str) -> RillResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.execution.validate()?;
        Ok(config)
    }
}

/// Query-level resource quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManagement {
    /// Maximum number of source workers running at the same time.
    pub concurrency_quota: usize,
    /// Maximum number of bytes the query may hold at once.
    /// `0` and `u64::MAX` both mean unlimited.
    pub memory_bytes_quota: u64,
}

impl Default for ResourceManagement {
    fn default() -> Self {
        Self {
            concurrency_quota: 1,
            memory_bytes_quota: u64::MAX,
        }
    }
}

impl ResourceManagement {
    /// Create a resource specification.
    pub const fn new(concurrency_quota: usize, memory_bytes_quota: u64) -> Self {
        Self {
            concurrency_quota,
            memory_bytes_quota,
        }
    }

    /// Whether the memory quota is unlimited.
    pub const fn is_memory_unlimited(&self) -> bool {
        self.memory_bytes_quota == 0 || self.memory_bytes_quota == u64::MAX
    }

    /// Memory quota in bytes, `None` when unlimited.
    pub fn memory_limit(&self) -> Option<usize> {
        if self.is_memory_unlimited() {
            None
        } else {
            Some(usize::try_from(self.memory_bytes_quota).unwrap_or(usize::MAX))
        }
    }

    /// Check the quotas are usable.
    pub fn validate(&self) -> RillResult<()> {
        if self.concurrency_quota == 0 {
            return Err(RillError::invalid_parameter(
                "concurrency quota must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Execution configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Resource quotas applied to each query.
    pub resources: ResourceManagement,
    /// Number of tables buffered per result stream before the sink blocks.
    pub result_buffer_size: usize,
    /// Collect per-operator metrics.
    pub collect_metrics: bool,
    /// Verify at teardown that every allocated byte was released.
    pub check_leaks: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            resources: ResourceManagement::default(),
            result_buffer_size: 16,
            collect_metrics: true,
            check_leaks: false,
        }
    }
}

impl ExecutionConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> RillResult<()> {
        self.resources.validate()?;
        if self.result_buffer_size == 0 {
            return Err(RillError::invalid_parameter(
                "result buffer size must be greater than zero",
            ));
        }
        Ok(())
    }
}
