//! In-memory source.

use std::any::Any;
use std::sync::Arc;

use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use log::debug;

use common_error::{RillError, RillResult};
use rill_plan::{ProcedureKind, ProcedureSpec};

use super::{FROM_KIND, downcast_spec, kind};
use crate::dataflow::{Dataset, DatasetId, PassthroughDataset, Source, Transformation};
use crate::executor::ExecutionContext;
use crate::metrics::ExecutionTimer;
use crate::registry::Administration;
use crate::table::{PARALLEL_GROUP_COLUMN, ScalarValue, Table, Time};

/// A table together with the partition that emits it.
#[derive(Debug, Clone)]
pub struct SourceTable {
    table: Table,
    partition: Option<usize>,
}

impl SourceTable {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            partition: None,
        }
    }

    /// Pin the table to one partition of a parallel source. `None` is
    /// partition 0.
    pub fn on_partition(mut self, partition: Option<usize>) -> Self {
        self.partition = partition;
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn partition(&self) -> Option<usize> {
        self.partition
    }

    fn emitted_by(&self, partition: usize, factor: usize) -> bool {
        factor <= 1 || self.partition.unwrap_or(0) == partition
    }
}

/// Parameters of the `from` source.
#[derive(Debug, Clone, Default)]
pub struct FromProcedureSpec {
    tables: Vec<SourceTable>,
}

impl FromProcedureSpec {
    pub fn new(tables: Vec<SourceTable>) -> Self {
        Self { tables }
    }

    /// Tables all emitted by partition 0.
    pub fn from_tables(tables: impl IntoIterator<Item = Table>) -> Self {
        Self::new(tables.into_iter().map(SourceTable::new).collect())
    }

    pub fn tables(&self) -> &[SourceTable] {
        &self.tables
    }
}

impl ProcedureSpec for FromProcedureSpec {
    fn kind(&self) -> ProcedureKind {
        kind(FROM_KIND)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> Option<String> {
        Some(format!("tables={}", self.tables.len()))
    }
}

/// One instance of the `from` source.
///
/// Emits the tables assigned to its partition in order, stamping the
/// `_parallel_group` column (when present) with the partition index. Every
/// table is copied into memory accounted against the query allocator.
#[derive(Debug)]
pub struct FromSource {
    id: DatasetId,
    partition: usize,
    tables: Vec<Table>,
    dataset: PassthroughDataset,
}

impl FromSource {
    /// Create instance `partition` of `factor`.
    pub fn new(id: DatasetId, spec: &FromProcedureSpec, partition: usize, factor: usize) -> Self {
        let tables = spec
            .tables
            .iter()
            .filter(|t| t.emitted_by(partition, factor))
            .map(|t| t.table.clone())
            .collect();
        Self {
            dataset: PassthroughDataset::new(id.clone()),
            id,
            partition,
            tables,
        }
    }

    /// Number of tables this instance emits.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn stamp(&self, table: &Table) -> RillResult<Table> {
        let Some(idx) = table.column_index(PARALLEL_GROUP_COLUMN) else {
            return Ok(table.clone());
        };
        if table.schema().field(idx).data_type() != &DataType::Int64 {
            return Ok(table.clone());
        }
        let group = ScalarValue::Int(self.partition as i64);
        let chunks = table
            .chunks()
            .iter()
            .map(|chunk| {
                let mut columns = chunk.columns().to_vec();
                columns[idx] = group.to_array(chunk.num_rows())?;
                Ok(RecordBatch::try_new(chunk.schema(), columns)?)
            })
            .collect::<RillResult<Vec<_>>>()?;
        Table::try_new(table.key().clone(), table.schema().clone(), chunks)
    }

    async fn produce(&self, ctx: &ExecutionContext) -> RillResult<()> {
        self.dataset.update_processing_time(ctx.now_time()).await?;
        for table in &self.tables {
            if ctx.is_cancelled() {
                return Err(ctx.terminal_error());
            }
            let timer = ExecutionTimer::start();
            let out = self.stamp(table)?.copy_buffered(ctx.allocator())?;
            let rows = out.num_rows();
            self.dataset.process(out).await?;
            ctx.update_metrics(self.id.as_str(), |m| {
                m.add_output(rows);
                m.add_time(timer.elapsed());
                m.update_memory(ctx.allocator().max_allocated());
            });
        }
        if ctx.is_cancelled() {
            return Err(ctx.terminal_error());
        }
        self.dataset.update_watermark(Time::MAX).await
    }
}

#[async_trait]
impl Source for FromSource {
    fn id(&self) -> &DatasetId {
        &self.id
    }

    fn add_transformation(&self, transformation: Arc<dyn Transformation>) {
        self.dataset.add_transformation(transformation);
    }

    async fn run(&self, ctx: &ExecutionContext) -> RillResult<()> {
        debug!("{}: emitting {} tables", self.id, self.tables.len());
        match self.produce(ctx).await {
            Ok(()) => {
                self.dataset.finish(None).await;
                Ok(())
            }
            Err(err) => {
                self.dataset.finish(Some(err.clone())).await;
                Err(err)
            }
        }
    }
}

pub(crate) fn create(
    id: &DatasetId,
    spec: &dyn ProcedureSpec,
    admin: &Administration<'_>,
) -> RillResult<Arc<dyn Source>> {
    let spec = downcast_spec::<FromProcedureSpec>(spec)?;
    if admin.partition() >= admin.parallel_factor() {
        return Err(RillError::internal(format!(
            "partition {} out of range for factor {}",
            admin.partition(),
            admin.parallel_factor()
        )));
    }
    Ok(Arc::new(FromSource::new(
        id.clone(),
        spec,
        admin.partition(),
        admin.parallel_factor(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ResourceAllocator;
    use crate::testing::{ColMeta, Event, RecordingTransformation, TestTable, window_table};

    fn grouped_table(partition: Option<usize>) -> SourceTable {
        TestTable {
            key_cols: vec!["_start".to_string()],
            columns: vec![ColMeta::time("_start"), ColMeta::int(PARALLEL_GROUP_COLUMN)],
            data: vec![vec![ScalarValue::Time(Time::ZERO), ScalarValue::Int(-1)]],
            resides_on_partition: partition,
            ..TestTable::default()
        }
        .to_source_table()
        .unwrap()
    }

    #[tokio::test]
    async fn test_emits_partition_tables_and_stamps_group() {
        let spec = FromProcedureSpec::new(vec![
            grouped_table(Some(0)),
            grouped_table(Some(1)),
            grouped_table(Some(1)),
        ]);
        let source = FromSource::new(DatasetId::new("from/1"), &spec, 1, 2);
        assert_eq!(source.len(), 2);

        let rec = Arc::new(RecordingTransformation::new());
        source.add_transformation(rec.clone());
        let ctx = ExecutionContext::new(Arc::new(ResourceAllocator::unlimited()));
        source.run(&ctx).await.unwrap();

        let tables = rec.tables();
        assert_eq!(tables.len(), 2);
        let test = TestTable::from_table(&tables[0]).unwrap();
        assert_eq!(test.data[0][1], ScalarValue::Int(1));
        assert_eq!(rec.watermarks(), vec![Time::MAX]);
        assert!(matches!(rec.events().last(), Some(Event::Finish(None))));
    }

    #[tokio::test]
    async fn test_cancelled_source_finishes_with_error() {
        let spec = FromProcedureSpec::from_tables(vec![window_table(0, 5, &[1.0])]);
        let source = FromSource::new(DatasetId::new("from"), &spec, 0, 1);
        let rec = Arc::new(RecordingTransformation::new());
        source.add_transformation(rec.clone());

        let ctx = ExecutionContext::new(Arc::new(ResourceAllocator::unlimited()));
        ctx.state().cancel_handle().cancel();
        let err = source.run(&ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(rec.tables().is_empty());
        assert!(matches!(rec.events().last(), Some(Event::Finish(Some(e))) if e.is_cancelled()));
    }

    #[tokio::test]
    async fn test_quota_exhaustion_fails_source() {
        let spec = FromProcedureSpec::from_tables(vec![window_table(0, 5, &[1.0, 2.0, 3.0])]);
        let source = FromSource::new(DatasetId::new("from"), &spec, 0, 1);
        let rec = Arc::new(RecordingTransformation::new());
        source.add_transformation(rec.clone());

        let ctx = ExecutionContext::new(Arc::new(ResourceAllocator::new(Some(16))));
        let err = source.run(&ctx).await.unwrap_err();
        assert!(err.is_resource_exhausted());
        assert!(matches!(rec.events().last(), Some(Event::Finish(Some(_)))));
    }
}
