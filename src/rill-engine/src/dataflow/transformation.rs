//! The operator capability set and dataset identity.

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;

use common_error::{RillError, RillResult};
use rill_plan::NodeId;

use crate::table::{GroupKey, Table, Time};

/// Identity of one running instance of a plan node.
///
/// A node running with parallel factor `N > 1` has instances `"<node>/0"`
/// through `"<node>/N-1"`; otherwise the id is the node id itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetId(Arc<str>);

impl DatasetId {
    /// Create an id from a string.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Id of instance `index` of a node running with `factor` instances.
    pub fn instance(node: &NodeId, index: usize, factor: usize) -> Self {
        if factor > 1 {
            Self::new(format!("{node}/{index}"))
        } else {
            Self::new(node.as_str())
        }
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A streaming operator.
///
/// Parents push into a transformation; every call names the calling parent so
/// operators with several parents can tell them apart. Calls from different
/// parents may arrive concurrently.
///
/// # Protocol
///
/// - `process` delivers one table. Tables for the same key arrive in the order
///   the parent produced them.
/// - `retract_table` withdraws a previously delivered key. It is always seen
///   before any replacement table for that key.
/// - `update_watermark` promises no more tables for windows closing at or
///   before `time`; `update_processing_time` does the same for wall time.
/// - `finish` is the parent's last call. With an error, the operator finishes
///   its own output with that error immediately.
#[async_trait]
pub trait Transformation: Send + Sync + Debug {
    /// Deliver one table from `parent`.
    async fn process(&self, parent: &DatasetId, table: Table) -> RillResult<()>;

    /// Withdraw the table previously delivered for `key`.
    async fn retract_table(&self, parent: &DatasetId, key: &GroupKey) -> RillResult<()>;

    /// Advance `parent`'s event-time watermark.
    async fn update_watermark(&self, parent: &DatasetId, time: Time) -> RillResult<()>;

    /// Advance `parent`'s processing time.
    async fn update_processing_time(&self, parent: &DatasetId, time: Time) -> RillResult<()>;

    /// `parent` produced its last table.
    async fn finish(&self, parent: &DatasetId, err: Option<RillError>);
}
