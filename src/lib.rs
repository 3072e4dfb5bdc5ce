//! Rill - streaming dataflow execution core
//!
//! Rill validates physical query plans, instantiates them as graphs of
//! push-based operators and runs them under per-query memory and concurrency
//! quotas.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

// Re-export core crates
pub use common_config as config;
pub use common_error as error;
pub use rill_engine as engine;
pub use rill_plan as plan;

/// Rill version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
