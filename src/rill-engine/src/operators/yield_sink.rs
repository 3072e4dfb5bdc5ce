//! Result sink.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use common_error::{RillError, RillResult};
use rill_plan::{ProcedureKind, ProcedureSpec};

use super::{YIELD_KIND, downcast_spec, kind};
use crate::dataflow::{Dataset, DatasetId, FanInState, Transformation};
use crate::executor::{ExecutionContext, ResultSender};
use crate::registry::Administration;
use crate::table::{GroupKey, Table, Time};

/// Result name used when a plan does not name its output.
pub const DEFAULT_YIELD_NAME: &str = "_result";

/// Parameters of the `yield` sink.
#[derive(Debug, Clone)]
pub struct YieldProcedureSpec {
    pub name: String,
}

impl YieldProcedureSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for YieldProcedureSpec {
    fn default() -> Self {
        Self::new(DEFAULT_YIELD_NAME)
    }
}

impl ProcedureSpec for YieldProcedureSpec {
    fn kind(&self) -> ProcedureKind {
        kind(YIELD_KIND)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> Option<String> {
        Some(format!("name={:?}", self.name))
    }
}

/// Delivers tables to the named result stream.
///
/// With several parents the stream closes after the last one finishes. An
/// upstream error is sent to the consumer and recorded as the query's
/// terminal error.
#[derive(Debug)]
pub struct YieldTransformation {
    id: DatasetId,
    sender: ResultSender,
    parents: Mutex<FanInState>,
    ctx: ExecutionContext,
}

impl YieldTransformation {
    pub fn new(
        id: DatasetId,
        sender: ResultSender,
        parents: Vec<DatasetId>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            id,
            sender,
            parents: Mutex::new(FanInState::new(parents)),
            ctx,
        }
    }

    /// Name of the result stream.
    pub fn name(&self) -> &str {
        self.sender.name()
    }
}

#[async_trait]
impl Transformation for YieldTransformation {
    async fn process(&self, _parent: &DatasetId, table: Table) -> RillResult<()> {
        if self.parents.lock().await.is_finished() {
            return Ok(());
        }
        let rows = table.num_rows();
        self.sender.send(Ok(table)).await?;
        self.ctx.update_metrics(self.id.as_str(), |m| {
            m.add_input(rows);
            m.add_output(rows);
        });
        Ok(())
    }

    async fn retract_table(&self, _parent: &DatasetId, key: &GroupKey) -> RillResult<()> {
        Err(RillError::not_implemented(format!(
            "result {:?} cannot retract already delivered table {key}",
            self.name()
        )))
    }

    async fn update_watermark(&self, parent: &DatasetId, time: Time) -> RillResult<()> {
        self.parents.lock().await.update_watermark(parent, time)?;
        Ok(())
    }

    async fn update_processing_time(&self, parent: &DatasetId, time: Time) -> RillResult<()> {
        self.parents.lock().await.update_processing_time(parent, time)?;
        Ok(())
    }

    async fn finish(&self, parent: &DatasetId, err: Option<RillError>) {
        let mut parents = self.parents.lock().await;
        if parents.is_finished() {
            return;
        }
        let err = match parents.finish_parent(parent) {
            Ok(true) => err,
            Ok(false) if err.is_none() => return,
            Ok(false) => err,
            Err(e) => Some(e),
        };
        parents.mark_finished();
        if let Some(e) = err {
            if let Err(send_err) = self.sender.send(Err(e.clone())).await {
                debug!("{}: could not deliver error: {send_err}", self.id);
            }
            self.ctx.state().fail(e);
        }
        debug!("{}: closing result {:?}", self.id, self.name());
        self.sender.close().await;
    }
}

pub(crate) fn create(
    id: &DatasetId,
    spec: &dyn ProcedureSpec,
    admin: &Administration<'_>,
) -> RillResult<(Arc<dyn Transformation>, Option<Arc<dyn Dataset>>)> {
    let spec = downcast_spec::<YieldProcedureSpec>(spec)?;
    let sender = admin.register_result(&spec.name)?;
    let transformation = Arc::new(YieldTransformation::new(
        id.clone(),
        sender,
        admin.parents().to_vec(),
        admin.context().clone(),
    ));
    Ok((transformation, None))
}

#[cfg(test)]
mod tests {
    use rill_plan::NodeId;

    use super::*;
    use crate::executor::ResultRegistry;
    use crate::memory::ResourceAllocator;
    use crate::testing::window_table;

    #[tokio::test]
    async fn test_error_reaches_consumer_and_state() {
        let ctx = ExecutionContext::new(Arc::new(ResourceAllocator::unlimited()));
        let registry = ResultRegistry::new(4, ctx.cancel_receiver());
        let sender = registry.register("out", &NodeId::new("yield")).unwrap();
        let parents = vec![DatasetId::new("a"), DatasetId::new("b")];
        let sink = YieldTransformation::new(DatasetId::new("yield"), sender, parents.clone(), ctx.clone());
        let mut result = registry
            .into_results(ctx.state())
            .shift_remove("out")
            .unwrap();

        sink.process(&parents[0], window_table(0, 5, &[1.0])).await.unwrap();
        sink.finish(&parents[1], Some(RillError::execution("upstream")))
            .await;
        sink.finish(&parents[0], None).await;

        assert!(result.next_table().await.unwrap().is_some());
        let err = result.next_table().await.unwrap_err();
        assert_eq!(err.to_string(), "ExecutionError: upstream");
        assert_eq!(ctx.state().error().unwrap().to_string(), "ExecutionError: upstream");
    }

    #[tokio::test]
    async fn test_retraction_rejected() {
        let ctx = ExecutionContext::new(Arc::new(ResourceAllocator::unlimited()));
        let registry = ResultRegistry::new(1, ctx.cancel_receiver());
        let sender = registry.register("out", &NodeId::new("yield")).unwrap();
        let parent = DatasetId::new("a");
        let sink = YieldTransformation::new(DatasetId::new("yield"), sender, vec![parent.clone()], ctx);
        let err = sink
            .retract_table(&parent, &GroupKey::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, RillError::NotImplemented(_)));
    }
}
