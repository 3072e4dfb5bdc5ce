//! Core error types for Rill.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using `RillError`.
pub type RillResult<T> = std::result::Result<T, RillError>;

/// Core error type for Rill operations.
///
/// The type is `Clone` because a single upstream failure is delivered to every
/// transformation subscribed to the failing dataset. Foreign error sources are
/// kept behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RillError {
    /// The physical plan is structurally invalid (attributes, edges, kinds).
    #[error("invalid physical query plan; {0}")]
    InvalidPlan(String),

    /// A resource quota (memory, concurrency) was exceeded.
    #[error("ResourceExhausted: {0}")]
    ResourceExhausted(String),

    /// The query was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Post-execution diagnostic: allocations were not released.
    #[error("MemoryLeak: {0}")]
    MemoryLeak(String),

    /// Type mismatch or invalid type operation.
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Schema-related error (column not found, mismatched columns).
    #[error("SchemaError: {0}")]
    SchemaError(String),

    /// Query execution error.
    #[error("ExecutionError: {0}")]
    ExecutionError(String),

    /// Feature not yet implemented.
    #[error("NotImplemented: {0}")]
    NotImplemented(String),

    /// Internal error (bug in Rill).
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Invalid parameter provided.
    #[error("InvalidParameter: {0}")]
    InvalidParameter(String),

    /// Arrow error.
    #[error("ArrowError: {0}")]
    ArrowError(Arc<arrow_schema::ArrowError>),

    /// JSON serialization error.
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(Arc<serde_json::Error>),
}

impl From<arrow_schema::ArrowError> for RillError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        Self::ArrowError(Arc::new(err))
    }
}

impl From<serde_json::Error> for RillError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerdeJsonError(Arc::new(err))
    }
}

impl RillError {
    /// Create a new `InvalidPlan` error.
    pub fn invalid_plan<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPlan(msg.into())
    }

    /// Create a new `ResourceExhausted` error.
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a new `Cancelled` error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a new `MemoryLeak` error.
    pub fn memory_leak<S: Into<String>>(msg: S) -> Self {
        Self::MemoryLeak(msg.into())
    }

    /// Create a new `TypeError`.
    pub fn type_error<S: Into<String>>(msg: S) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a new `SchemaError`.
    pub fn schema_error<S: Into<String>>(msg: S) -> Self {
        Self::SchemaError(msg.into())
    }

    /// Create a new `ExecutionError`.
    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Self::ExecutionError(msg.into())
    }

    /// Create a new `NotImplemented` error.
    pub fn not_implemented<S: Into<String>>(msg: S) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create a new `InternalError`.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::InternalError(msg.into())
    }

    /// Create a new `InvalidParameter` error.
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Whether this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Whether this error is a quota violation.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

/// Ensure a condition holds, returning an `ExecutionError` if not.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            return Err($crate::RillError::ExecutionError($msg.to_string()));
        }
    };
    ($cond:expr, $variant:ident: $($msg:tt)*) => {
        if !$cond {
            return Err($crate::RillError::$variant(format!($($msg)*)));
        }
    };
}

/// Return early with an `InvalidPlan` error.
#[macro_export]
macro_rules! plan_err {
    ($($arg:tt)*) => {
        return Err($crate::RillError::InvalidPlan(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RillError::type_error("expected Float, got String");
        assert_eq!(err.to_string(), "TypeError: expected Float, got String");
    }

    #[test]
    fn test_invalid_plan_prefix() {
        let err = RillError::invalid_plan(r#"attribute "parallel-run" on "a" is bad"#);
        assert_eq!(
            err.to_string(),
            r#"invalid physical query plan; attribute "parallel-run" on "a" is bad"#
        );
    }

    #[test]
    fn test_clone_preserves_arrow_source() {
        let err: RillError = arrow_schema::ArrowError::ComputeError("boom".to_string()).into();
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(matches!(cloned, RillError::ArrowError(_)));
    }

    #[test]
    fn test_ensure_macro() {
        fn check(v: usize) -> RillResult<()> {
            ensure!(v > 0, InvalidParameter: "value must be positive, got {}", v);
            Ok(())
        }
        assert!(check(1).is_ok());
        assert!(matches!(check(0), Err(RillError::InvalidParameter(_))));
    }

    #[test]
    fn test_classifiers() {
        assert!(RillError::cancelled("stop").is_cancelled());
        assert!(RillError::resource_exhausted("mem").is_resource_exhausted());
        assert!(!RillError::internal("bug").is_cancelled());
    }
}
