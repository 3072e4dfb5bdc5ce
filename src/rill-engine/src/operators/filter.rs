//! Row filter.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use common_error::{RillError, RillResult};
use rill_plan::{ProcedureKind, ProcedureSpec};

use super::{FILTER_KIND, downcast_spec, kind};
use crate::dataflow::{
    AccumulationMode, CachedDataset, Dataset, DatasetId, FanIn, Transformation, Trigger,
};
use crate::executor::ExecutionContext;
use crate::expr::{Expr, PredicateEvaluator};
use crate::metrics::ExecutionTimer;
use crate::registry::Administration;
use crate::table::{GroupKey, Table, Time};

/// Parameters of the `filter` transformation.
#[derive(Debug, Clone)]
pub struct FilterProcedureSpec {
    pub predicate: Expr,
    pub trigger: Trigger,
}

impl FilterProcedureSpec {
    pub fn new(predicate: Expr) -> Self {
        Self {
            predicate,
            trigger: Trigger::default(),
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }
}

impl ProcedureSpec for FilterProcedureSpec {
    fn kind(&self) -> ProcedureKind {
        kind(FILTER_KIND)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> Option<String> {
        Some(format!("fn: (r) => {}", self.predicate))
    }
}

/// Keeps the rows matching a predicate.
///
/// Output tables are buffered per group key and released by the trigger;
/// a key whose rows are all filtered out produces no table.
#[derive(Debug)]
pub struct FilterTransformation {
    id: DatasetId,
    predicate: Expr,
    evaluator: PredicateEvaluator,
    dataset: Arc<CachedDataset>,
    fan_in: FanIn,
    ctx: ExecutionContext,
}

impl FilterTransformation {
    pub fn new(
        id: DatasetId,
        predicate: Expr,
        dataset: Arc<CachedDataset>,
        parents: Vec<DatasetId>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            id,
            predicate,
            evaluator: PredicateEvaluator::new(),
            dataset,
            fan_in: FanIn::new(parents),
            ctx,
        }
    }

    fn filter_table(&self, table: &Table) -> RillResult<Option<Table>> {
        let mut chunks = Vec::with_capacity(table.chunks().len());
        table.do_chunks(|chunk| {
            let filtered = self.evaluator.filter(&self.predicate, chunk)?;
            if filtered.num_rows() > 0 {
                chunks.push(filtered);
            }
            Ok(())
        })?;
        if chunks.is_empty() {
            return Ok(None);
        }
        Table::try_new(table.key().clone(), table.schema().clone(), chunks).map(Some)
    }
}

#[async_trait]
impl Transformation for FilterTransformation {
    async fn process(&self, _parent: &DatasetId, table: Table) -> RillResult<()> {
        if self.fan_in.is_finished().await {
            return Ok(());
        }
        let timer = ExecutionTimer::start();
        let rows_in = table.num_rows();
        let filtered = self.filter_table(&table)?;
        drop(table);

        let rows_out = filtered.as_ref().map_or(0, Table::num_rows);
        if let Some(out) = filtered {
            self.dataset.process(out).await?;
        }
        self.ctx.update_metrics(self.id.as_str(), |m| {
            m.add_input(rows_in);
            if rows_out > 0 {
                m.add_output(rows_out);
            }
            m.add_time(timer.elapsed());
        });
        Ok(())
    }

    async fn retract_table(&self, _parent: &DatasetId, key: &GroupKey) -> RillResult<()> {
        self.dataset.retract_table(key).await
    }

    async fn update_watermark(&self, parent: &DatasetId, time: Time) -> RillResult<()> {
        self.fan_in
            .update_watermark(parent, time, self.dataset.as_ref())
            .await
    }

    async fn update_processing_time(&self, parent: &DatasetId, time: Time) -> RillResult<()> {
        self.fan_in
            .update_processing_time(parent, time, self.dataset.as_ref())
            .await
    }

    async fn finish(&self, parent: &DatasetId, err: Option<RillError>) {
        self.fan_in.finish(parent, err, self.dataset.as_ref()).await;
        let reserved = self.dataset.reserved_bytes().await;
        self.ctx
            .update_metrics(self.id.as_str(), |m| m.update_memory(reserved));
    }
}

pub(crate) fn create(
    id: &DatasetId,
    spec: &dyn ProcedureSpec,
    admin: &Administration<'_>,
) -> RillResult<(Arc<dyn Transformation>, Option<Arc<dyn Dataset>>)> {
    let spec = downcast_spec::<FilterProcedureSpec>(spec)?;
    let dataset = Arc::new(CachedDataset::new(
        id.clone(),
        spec.trigger.clone(),
        AccumulationMode::Discarding,
        Arc::clone(admin.allocator()),
    ));
    let transformation = Arc::new(FilterTransformation::new(
        id.clone(),
        spec.predicate.clone(),
        Arc::clone(&dataset),
        admin.parents().to_vec(),
        admin.context().clone(),
    ));
    Ok((transformation, Some(dataset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, lit};
    use crate::memory::ResourceAllocator;
    use crate::testing::{Event, RecordingTransformation, window_table};

    fn filter(predicate: Expr) -> (FilterTransformation, Arc<RecordingTransformation>, DatasetId) {
        let parent = DatasetId::new("from");
        let ctx = ExecutionContext::new(Arc::new(ResourceAllocator::unlimited()));
        let dataset = Arc::new(CachedDataset::new(
            DatasetId::new("filter"),
            Trigger::after_watermark(),
            AccumulationMode::Discarding,
            Arc::clone(ctx.allocator()),
        ));
        let rec = Arc::new(RecordingTransformation::new());
        dataset.add_transformation(rec.clone());
        let t = FilterTransformation::new(
            DatasetId::new("filter"),
            predicate,
            dataset,
            vec![parent.clone()],
            ctx,
        );
        (t, rec, parent)
    }

    #[tokio::test]
    async fn test_keeps_matching_rows_until_watermark() {
        let (t, rec, parent) = filter(col("_value").lt(lit(7.5)));
        t.process(&parent, window_table(0, 5, &[5.0, 6.0, 7.0, 8.0, 9.0]))
            .await
            .unwrap();
        assert!(rec.tables().is_empty());

        t.update_watermark(&parent, Time::new(5)).await.unwrap();
        let tables = rec.tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].num_rows(), 3);
    }

    #[tokio::test]
    async fn test_empty_result_dropped() {
        let (t, rec, parent) = filter(col("_value").gt(lit(100.0)));
        t.process(&parent, window_table(0, 5, &[1.0, 2.0]))
            .await
            .unwrap();
        t.finish(&parent, None).await;
        assert!(rec.tables().is_empty());
        assert!(matches!(rec.events().last(), Some(Event::Finish(None))));
    }

    #[tokio::test]
    async fn test_missing_column_fails_process() {
        let (t, _rec, parent) = filter(col("nope").eq(lit(1i64)));
        let err = t
            .process(&parent, window_table(0, 5, &[1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, RillError::SchemaError(_)));
    }
}
