//! Built-in operators.
//!
//! | Kind | Role | Output |
//! |------|------|--------|
//! | `from` | Source | In-memory tables, optionally split by partition |
//! | `filter` | Transformation | Rows matching a predicate, grouped until the watermark passes |
//! | `partitionMerge` | Transformation | Union of every parallel instance |
//! | `yield` | Sink | A named result stream |

pub(crate) mod filter;
pub(crate) mod from;
pub(crate) mod partition_merge;
pub(crate) mod yield_sink;

use common_error::{RillError, RillResult};
use rill_plan::{ProcedureKind, ProcedureSpec};

pub use filter::{FilterProcedureSpec, FilterTransformation};
pub use from::{FromProcedureSpec, FromSource, SourceTable};
pub use partition_merge::{PartitionMergeProcedureSpec, PartitionMergeTransformation};
pub use yield_sink::{DEFAULT_YIELD_NAME, YieldProcedureSpec, YieldTransformation};

/// Kind of the in-memory source.
pub const FROM_KIND: &str = "from";
/// Kind of the row filter.
pub const FILTER_KIND: &str = "filter";
/// Kind of the parallel merge.
pub const PARTITION_MERGE_KIND: &str = "partitionMerge";
/// Kind of the result sink.
pub const YIELD_KIND: &str = "yield";

/// Downcast a procedure spec handed to a constructor.
pub(crate) fn downcast_spec<T: 'static>(spec: &dyn ProcedureSpec) -> RillResult<&T> {
    spec.as_any().downcast_ref::<T>().ok_or_else(|| {
        RillError::invalid_plan(format!(
            "invalid spec type for {:?}: expected {}",
            spec.kind().as_str(),
            std::any::type_name::<T>()
        ))
    })
}

pub(crate) fn kind(name: &str) -> ProcedureKind {
    ProcedureKind::new(name)
}
