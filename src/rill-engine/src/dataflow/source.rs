//! Sources: plan roots driven by executor workers.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use common_error::RillResult;

use super::{DatasetId, Transformation};
use crate::executor::ExecutionContext;

/// A plan root. Each instance runs on its own worker.
///
/// `run` produces every table, then advances the watermark to
/// [`Time::MAX`](crate::table::Time::MAX) and finishes its dataset. If it
/// stops early, because of cancellation or a failure, it finishes the dataset
/// with that error and returns it.
#[async_trait]
pub trait Source: Send + Sync + Debug {
    /// Identity of this source instance.
    fn id(&self) -> &DatasetId;

    /// Register a child. Called while the graph is built.
    fn add_transformation(&self, transformation: Arc<dyn Transformation>);

    /// Produce the source's output.
    async fn run(&self, ctx: &ExecutionContext) -> RillResult<()>;
}
