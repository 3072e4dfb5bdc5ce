//! Streaming execution core for Rill.
//!
//! A validated [`PlanSpec`](rill_plan::PlanSpec) is instantiated as a graph of
//! push-based operators. Sources run on worker tasks and push keyed tables
//! through transformations towards named result streams; watermarks, retractions
//! and completion travel the same edges.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌──────────┐     ┌────────────────┐     ┌───────┐
//! │ from/0   │ ──▶ │ filter/0 │ ──▶ │                │     │       │
//! └──────────┘     └──────────┘     │ partitionMerge │ ──▶ │ yield │ ──▶ QueryResult
//! ┌──────────┐     ┌──────────┐     │                │     │       │
//! │ from/1   │ ──▶ │ filter/1 │ ──▶ │                │     │       │
//! └──────────┘     └──────────┘     └────────────────┘     └───────┘
//! ```
//!
//! # Key Components
//!
//! ## Dataflow ([`dataflow`])
//!
//! - [`Transformation`]: operator capability set (process, retract, watermark,
//!   processing time, finish)
//! - [`Dataset`]: operator output; [`PassthroughDataset`] forwards at once,
//!   [`CachedDataset`] buffers per group key until its trigger fires
//! - [`FanIn`]: min-watermark and completion bookkeeping for several parents
//!
//! ## Memory ([`memory`])
//!
//! [`ResourceAllocator`] accounts every buffered table against the query's
//! memory quota; exceeding it fails the query with `ResourceExhausted`.
//!
//! ## Execution ([`executor`], [`program`])
//!
//! - [`Executor`]: validates attributes, replicates parallel nodes, spawns
//!   source workers bounded by the concurrency quota
//! - [`RunningQuery`] / [`Query`]: results, cancellation, completion
//! - [`run_checked`]: run a program and fail on leaked memory

#![allow(clippy::missing_const_for_fn)] // Builder patterns often can't be const
#![allow(clippy::return_self_not_must_use)] // Builder patterns don't always need must_use
#![allow(clippy::doc_markdown)] // Documentation backticks are sometimes unnecessary
#![allow(
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)] // Some casts are intentional
#![allow(clippy::type_complexity)] // Constructor signatures are spelled out
#![allow(clippy::significant_drop_tightening)] // Some guards serialize downstream calls
#![allow(clippy::option_if_let_else)] // if let/else is sometimes clearer than map_or
#![allow(clippy::len_without_is_empty)]

pub mod dataflow;
pub mod executor;
pub mod expr;
pub mod memory;
pub mod metrics;
pub mod operators;
pub mod program;
pub mod registry;
pub mod table;
pub mod testing;

pub use dataflow::{
    AccumulationMode, CachedDataset, Dataset, DatasetId, FanIn, FanInState, PassthroughDataset,
    Source, Transformation, Trigger,
};
pub use executor::{
    ExecutionContext, ExecutionState, Executor, QueryResult, QueryState, RunningQuery,
    RuntimeConfig,
};
pub use memory::{MemoryReservation, ResourceAllocator};
pub use metrics::{MetricsSink, OperatorMetrics};
pub use program::{PlanProgram, Program, Query, ResultIterator, run_checked};
pub use registry::{Administration, TransformationRegistry};
pub use table::{GroupKey, ScalarValue, Table, TableBuilder, Time};
