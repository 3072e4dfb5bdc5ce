//! Merge of parallel instances back into one stream.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;

use common_error::{RillError, RillResult};
use rill_plan::{ProcedureKind, ProcedureSpec};

use super::{PARTITION_MERGE_KIND, downcast_spec, kind};
use crate::dataflow::{Dataset, DatasetId, FanIn, PassthroughDataset, Transformation};
use crate::executor::ExecutionContext;
use crate::metrics::ExecutionTimer;
use crate::registry::Administration;
use crate::table::{GroupKey, Table, Time};

/// Parameters of the `partitionMerge` transformation. It has none.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionMergeProcedureSpec;

impl ProcedureSpec for PartitionMergeProcedureSpec {
    fn kind(&self) -> ProcedureKind {
        kind(PARTITION_MERGE_KIND)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Unions the outputs of every instance of a parallel region.
///
/// Tables pass through unchanged, copied into memory accounted against the
/// query allocator. The output watermark is the minimum over all parents,
/// the first parent error finishes the output, and a clean finish waits for
/// every parent.
#[derive(Debug)]
pub struct PartitionMergeTransformation {
    id: DatasetId,
    dataset: Arc<PassthroughDataset>,
    fan_in: FanIn,
    ctx: ExecutionContext,
}

impl PartitionMergeTransformation {
    pub fn new(
        id: DatasetId,
        dataset: Arc<PassthroughDataset>,
        parents: Vec<DatasetId>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            id,
            dataset,
            fan_in: FanIn::new(parents),
            ctx,
        }
    }
}

#[async_trait]
impl Transformation for PartitionMergeTransformation {
    async fn process(&self, parent: &DatasetId, table: Table) -> RillResult<()> {
        if self.fan_in.is_finished().await {
            trace!("{}: dropping table from {parent} after finish", self.id);
            return Ok(());
        }
        let timer = ExecutionTimer::start();
        let rows = table.num_rows();
        let out = table.copy_buffered(self.ctx.allocator())?;
        drop(table);
        self.dataset.process(out).await?;
        self.ctx.update_metrics(self.id.as_str(), |m| {
            m.add_input(rows);
            m.add_output(rows);
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
    }
}

pub(crate) fn create(
    id: &DatasetId,
    spec: &dyn ProcedureSpec,
    admin: &Administration<'_>,
) -> RillResult<(Arc<dyn Transformation>, Option<Arc<dyn Dataset>>)> {
    downcast_spec::<PartitionMergeProcedureSpec>(spec)?;
    let dataset = Arc::new(PassthroughDataset::new(id.clone()));
    let transformation = Arc::new(PartitionMergeTransformation::new(
        id.clone(),
        Arc::clone(&dataset),
        admin.parents().to_vec(),
        admin.context().clone(),
    ));
    Ok((transformation, Some(dataset)))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::memory::ResourceAllocator;
    use crate::testing::{Event, RecordingTransformation, window_table};

    fn merge(
        parents: usize,
        allocator: Arc<ResourceAllocator>,
    ) -> (PartitionMergeTransformation, Arc<RecordingTransformation>, Vec<DatasetId>) {
        let ids: Vec<_> = (0..parents)
            .map(|i| DatasetId::new(format!("from/{i}")))
            .collect();
        let dataset = Arc::new(PassthroughDataset::new(DatasetId::new("merge")));
        let rec = Arc::new(RecordingTransformation::new());
        dataset.add_transformation(rec.clone());
        let t = PartitionMergeTransformation::new(
            DatasetId::new("merge"),
            dataset,
            ids.clone(),
            ExecutionContext::new(allocator),
        );
        (t, rec, ids)
    }

    #[tokio::test]
    async fn test_tables_pass_through_unchanged() {
        let (t, rec, parents) = merge(2, Arc::new(ResourceAllocator::unlimited()));
        let input = window_table(0, 5, &[1.0, 2.0]);
        t.process(&parents[1], input.clone()).await.unwrap();

        let out = rec.tables();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key(), input.key());
        assert_eq!(out[0].to_batch().unwrap(), input.to_batch().unwrap());
        assert!(out[0].reserved_bytes() > 0);
    }

    #[tokio::test]
    async fn test_finishes_after_every_parent() {
        let (t, rec, parents) = merge(3, Arc::new(ResourceAllocator::unlimited()));
        t.finish(&parents[0], None).await;
        t.finish(&parents[2], None).await;
        assert!(rec.finishes().is_empty());
        t.finish(&parents[1], None).await;
        assert_eq!(rec.finishes().len(), 1);
    }

    #[tokio::test]
    async fn test_first_error_finishes_and_later_calls_are_ignored() {
        let (t, rec, parents) = merge(2, Arc::new(ResourceAllocator::unlimited()));
        t.finish(&parents[0], Some(RillError::execution("partition failed")))
            .await;
        t.process(&parents[1], window_table(0, 5, &[1.0])).await.unwrap();
        t.finish(&parents[1], None).await;

        let events = rec.events();
        assert_eq!(events.len(), 1);
        assert!(
            matches!(&events[0], Event::Finish(Some(e)) if e.to_string() == "ExecutionError: partition failed")
        );
    }

    #[tokio::test]
    async fn test_copy_is_accounted() {
        let allocator = Arc::new(ResourceAllocator::new(Some(64)));
        let (t, rec, parents) = merge(1, allocator);
        let err = t
            .process(&parents[0], window_table(0, 5, &[1.0, 2.0, 3.0, 4.0]))
            .await
            .unwrap_err();
        assert!(err.is_resource_exhausted());
        assert!(rec.tables().is_empty());
    }

    proptest! {
        #[test]
        fn prop_watermark_is_min_across_parents(
            n in 1usize..4,
            updates in proptest::collection::vec((0usize..4, 0i64..1_000), 1..40),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let forwarded = rt.block_on(async {
                let (t, rec, parents) = merge(n, Arc::new(ResourceAllocator::unlimited()));
                let mut latest = vec![Time::MIN; n];
                let mut expected = Vec::new();
                for (p, mark) in updates {
                    let p = p % n;
                    latest[p] = Time::new(mark);
                    let min = *latest.iter().min().unwrap();
                    if expected.last().map_or(min > Time::MIN, |last| min > *last) {
                        expected.push(min);
                    }
                    t.update_watermark(&parents[p], Time::new(mark)).await.unwrap();
                }
                (rec.watermarks(), expected)
            });
            prop_assert_eq!(forwarded.0, forwarded.1);
        }

        #[test]
        fn prop_processing_time_is_min_across_parents(
            n in 1usize..4,
            updates in proptest::collection::vec((0usize..4, 0i64..1_000), 1..40),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let forwarded = rt.block_on(async {
                let (t, rec, parents) = merge(n, Arc::new(ResourceAllocator::unlimited()));
                let mut latest = vec![Time::MIN; n];
                let mut expected = Vec::new();
                for (p, time) in updates {
                    let p = p % n;
                    latest[p] = Time::new(time);
                    let min = *latest.iter().min().unwrap();
                    if expected.last().map_or(min > Time::MIN, |last| min > *last) {
                        expected.push(min);
                    }
                    t.update_processing_time(&parents[p], Time::new(time)).await.unwrap();
                }
                (rec.processing_times(), expected)
            });
            prop_assert_eq!(forwarded.0, forwarded.1);
        }
    }
}
