//! Table model: group keys, scalar values and keyed record-batch tables.
//!
//! A [`Table`] is an immutable sequence of arrow [`RecordBatch`] chunks that
//! share one [`GroupKey`]. Tables built by operators carry a
//! [`MemoryReservation`] against the query's allocator; the bytes are returned
//! when the last clone of the table is dropped.

mod key;
mod scalar;
mod time;

use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use common_error::{RillError, RillResult};

use crate::memory::{MemoryReservation, ResourceAllocator};

pub use key::GroupKey;
pub use scalar::{ScalarValue, iter_to_array, time_data_type};
pub use time::Time;

/// Default label of the column carrying a window's exclusive upper bound.
pub const DEFAULT_STOP_COLUMN: &str = "_stop";
/// Default label of the column carrying a window's inclusive lower bound.
pub const DEFAULT_START_COLUMN: &str = "_start";
/// Synthetic column stamped with the partition a row was produced on.
pub const PARALLEL_GROUP_COLUMN: &str = "_parallel_group";

/// An immutable batch of rows sharing one group key.
#[derive(Debug, Clone)]
pub struct Table {
    key: GroupKey,
    schema: SchemaRef,
    chunks: Vec<RecordBatch>,
    reservation: Option<Arc<MemoryReservation>>,
}

impl Table {
    /// Create a table from chunks. Every chunk must have the table's columns.
    pub fn try_new(key: GroupKey, schema: SchemaRef, chunks: Vec<RecordBatch>) -> RillResult<Self> {
        for chunk in &chunks {
            check_schema(&schema, chunk)?;
        }
        Ok(Self {
            key,
            schema,
            chunks,
            reservation: None,
        })
    }

    /// A table with columns but no rows.
    pub fn empty(key: GroupKey, schema: SchemaRef) -> Self {
        Self {
            key,
            schema,
            chunks: Vec::new(),
            reservation: None,
        }
    }

    /// The group key.
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// The column schema.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// The row chunks in order.
    pub fn chunks(&self) -> &[RecordBatch] {
        &self.chunks
    }

    /// Total rows across chunks.
    pub fn num_rows(&self) -> usize {
        self.chunks.iter().map(RecordBatch::num_rows).sum()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Index of a column by label.
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.schema.index_of(label).ok()
    }

    /// Bytes held by the chunks' arrays.
    pub fn memory_size(&self) -> usize {
        self.chunks.iter().map(RecordBatch::get_array_memory_size).sum()
    }

    /// Bytes accounted against the allocator for this table.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.as_ref().map_or(0, |r| r.size())
    }

    /// Visit each chunk in order, stopping at the first error.
    pub fn do_chunks<F>(&self, mut f: F) -> RillResult<()>
    where
        F: FnMut(&RecordBatch) -> RillResult<()>,
    {
        for chunk in &self.chunks {
            f(chunk)?;
        }
        Ok(())
    }

    /// All rows as one batch.
    pub fn to_batch(&self) -> RillResult<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.chunks)?)
    }

    /// A table with the same rows whose bytes are accounted against `allocator`.
    ///
    /// See [`TableBuilder::build`] for when the column buffers are shared.
    pub fn copy_buffered(&self, allocator: &Arc<ResourceAllocator>) -> RillResult<Self> {
        let mut builder = TableBuilder::new(self.key.clone(), self.schema.clone(), allocator);
        builder.append(self)?;
        builder.build()
    }
}

fn check_schema(schema: &SchemaRef, chunk: &RecordBatch) -> RillResult<()> {
    if chunk.schema().fields() != schema.fields() {
        return Err(RillError::schema_error(format!(
            "chunk columns {:?} do not match table columns {:?}",
            chunk.schema().fields().iter().map(|f| f.name()).collect::<Vec<_>>(),
            schema.fields().iter().map(|f| f.name()).collect::<Vec<_>>(),
        )));
    }
    Ok(())
}

/// Accumulates the chunks of one group key, accounting their bytes.
#[derive(Debug)]
pub struct TableBuilder {
    key: GroupKey,
    schema: SchemaRef,
    chunks: Vec<RecordBatch>,
    reservation: MemoryReservation,
}

impl TableBuilder {
    /// Create an empty builder for `key`.
    pub fn new(key: GroupKey, schema: SchemaRef, allocator: &Arc<ResourceAllocator>) -> Self {
        Self {
            key,
            schema,
            chunks: Vec::new(),
            reservation: MemoryReservation::empty(Arc::clone(allocator)),
        }
    }

    /// The group key being built.
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Rows appended so far.
    pub fn num_rows(&self) -> usize {
        self.chunks.iter().map(RecordBatch::num_rows).sum()
    }

    /// Bytes held by the builder.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.size()
    }

    /// Append every chunk of `table`. Fails if the columns differ or the
    /// allocator quota would be exceeded.
    pub fn append(&mut self, table: &Table) -> RillResult<()> {
        if table.schema().fields() != self.schema.fields() {
            return Err(RillError::schema_error(format!(
                "table for key {} changed columns",
                self.key
            )));
        }
        for chunk in table.chunks() {
            self.append_batch(chunk.clone())?;
        }
        Ok(())
    }

    /// Append one batch.
    pub fn append_batch(&mut self, batch: RecordBatch) -> RillResult<()> {
        check_schema(&self.schema, &batch)?;
        if batch.num_rows() == 0 {
            return Ok(());
        }
        self.reservation.grow(batch.get_array_memory_size())?;
        self.chunks.push(batch);
        Ok(())
    }

    /// Produce a table holding the buffered rows as one chunk.
    ///
    /// Several chunks are concatenated into fresh buffers. A single chunk is
    /// sliced without copying, so the table shares its column buffers with
    /// that chunk. Either way the table gets its own reservation for the full
    /// chunk size, and the builder keeps its chunks, so an accumulating cache
    /// can go on appending after a build.
    pub fn build(&self) -> RillResult<Table> {
        if self.chunks.is_empty() {
            return Ok(Table::empty(self.key.clone(), self.schema.clone()));
        }
        let batch = concat_batches(&self.schema, &self.chunks)?;
        let reservation = MemoryReservation::try_new(
            Arc::clone(self.reservation.allocator()),
            batch.get_array_memory_size(),
        )?;
        Ok(Table {
            key: self.key.clone(),
            schema: self.schema.clone(),
            chunks: vec![batch],
            reservation: Some(Arc::new(reservation)),
        })
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("_value", DataType::Float64, true),
            Field::new("n", DataType::Int64, true),
        ]))
    }

    fn batch(values: Vec<f64>) -> RecordBatch {
        let n: Vec<i64> = (0..values.len() as i64).collect();
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Float64Array::from(values)),
                Arc::new(Int64Array::from(n)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_table_rows_and_chunks() {
        let table =
            Table::try_new(GroupKey::empty(), schema(), vec![batch(vec![1.0, 2.0]), batch(vec![3.0])])
                .unwrap();
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.column_index("n"), Some(1));

        let mut seen = Vec::new();
        table
            .do_chunks(|c| {
                seen.push(c.num_rows());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![2, 1]);
        assert_eq!(table.to_batch().unwrap().num_rows(), 3);
    }

    #[test]
    fn test_mismatched_chunk_rejected() {
        let other = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, true)]));
        let err = Table::try_new(GroupKey::empty(), other, vec![batch(vec![1.0])]).unwrap_err();
        assert!(matches!(err, RillError::SchemaError(_)));
    }

    #[test]
    fn test_copy_buffered_accounts_until_last_clone_drops() {
        let allocator = Arc::new(ResourceAllocator::unlimited());
        let table = Table::try_new(GroupKey::empty(), schema(), vec![batch(vec![1.0, 2.0])]).unwrap();

        let copy = table.copy_buffered(&allocator).unwrap();
        assert_eq!(copy.num_rows(), 2);
        assert!(copy.reserved_bytes() > 0);
        assert_eq!(allocator.allocated(), copy.reserved_bytes());

        let clone = copy.clone();
        drop(copy);
        assert!(allocator.allocated() > 0);
        drop(clone);
        assert_eq!(allocator.allocated(), 0);
    }

    #[test]
    fn test_single_chunk_build_shares_buffers_but_is_accounted() {
        let allocator = Arc::new(ResourceAllocator::unlimited());
        let sample = batch(vec![1.0, 2.0]);
        let size = sample.get_array_memory_size();
        let table = Table::try_new(GroupKey::empty(), schema(), vec![sample.clone()]).unwrap();

        let copy = table.copy_buffered(&allocator).unwrap();
        assert_eq!(copy.reserved_bytes(), size);
        let mut shared = false;
        copy.do_chunks(|chunk| {
            shared = chunk.column(0).to_data().buffers()[0].as_ptr()
                == sample.column(0).to_data().buffers()[0].as_ptr();
            Ok(())
        })
        .unwrap();
        assert!(shared);

        let two = Table::try_new(GroupKey::empty(), schema(), vec![batch(vec![1.0]), batch(vec![2.0])])
            .unwrap();
        let merged = two.copy_buffered(&allocator).unwrap();
        let mut chunks = 0;
        merged
            .do_chunks(|_| {
                chunks += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(chunks, 1);
        assert_eq!(merged.num_rows(), 2);
    }

    #[test]
    fn test_builder_respects_quota() {
        let sample = batch(vec![1.0, 2.0, 3.0]);
        let size = sample.get_array_memory_size();
        let allocator = Arc::new(ResourceAllocator::new(Some(size)));

        let mut builder = TableBuilder::new(GroupKey::empty(), schema(), &allocator);
        builder.append_batch(sample.clone()).unwrap();
        let err = builder.append_batch(sample).unwrap_err();
        assert!(err.is_resource_exhausted());
        assert_eq!(builder.num_rows(), 3);
        drop(builder);
        assert_eq!(allocator.allocated(), 0);
    }
}
