//! Query execution.
//!
//! - [`Executor`]: validates a plan, builds the operator graph and spawns
//!   one worker per source instance
//! - [`RunningQuery`]: handle to the running query and its result streams
//! - [`ExecutionContext`]: allocator, state and cancellation shared by every
//!   operator of a query
//! - [`QueryResult`]: one named stream of result tables

mod context;
mod local;
mod result;
mod state;

pub use context::{ExecutionContext, RuntimeConfig};
pub use local::{Executor, RunningQuery};
pub use result::{QueryResult, ResultRegistry, ResultSender, TableStream, Tables};
pub use state::{CancellationHandle, ExecutionState, QueryState, wait_cancelled};
