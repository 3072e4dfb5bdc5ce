//! Physical plan model for the Rill execution core.
//!
//! A physical plan is a DAG of [`PhysicalPlanNode`]s, each carrying a
//! [`ProcedureSpec`] (operator kind plus parameters) and two attribute sets:
//! the properties it guarantees about its output and the properties it
//! requires of its input. [`validate_attributes`] checks those agree across
//! every edge; the engine refuses to build a plan that fails it.
//!
//! ```text
//!   from-test ── outputs parallel-run(2)
//!       │
//!   merge ───── requires parallel-run(2), outputs parallel-merge(2)
//!       │
//!   filter
//!       │
//!   yield
//! ```

mod attributes;
mod explain;
mod node;
mod spec;
mod validate;

pub use attributes::{PARALLEL_MERGE_KEY, PARALLEL_RUN_KEY, PhysicalAttr};
pub use node::{NodeId, PhysicalPlanNode, ProcedureKind, ProcedureSpec};
pub use spec::{PlanSpec, PlanSpecBuilder};
pub use validate::validate_attributes;
