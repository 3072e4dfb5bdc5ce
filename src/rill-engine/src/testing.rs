//! Helpers for testing operators and whole plans.
//!
//! [`TestTable`] is a row-oriented table description that converts to and
//! from engine [`Table`]s, and [`RecordingTransformation`] captures every
//! call a dataset makes to its children.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use common_error::{RillError, RillResult};

use crate::dataflow::{DatasetId, Transformation};
use crate::memory::ResourceAllocator;
use crate::operators::SourceTable;
use crate::table::{
    DEFAULT_START_COLUMN, DEFAULT_STOP_COLUMN, GroupKey, PARALLEL_GROUP_COLUMN, ScalarValue,
    Table, Time, iter_to_array, time_data_type,
};

/// Try to install `env_logger` for tests. Repeated calls are harmless.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An allocator without a quota.
pub fn unlimited_allocator() -> Arc<ResourceAllocator> {
    Arc::new(ResourceAllocator::unlimited())
}

/// Label and type of one test-table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColMeta {
    pub label: String,
    pub data_type: DataType,
}

impl ColMeta {
    pub fn new(label: impl Into<String>, data_type: DataType) -> Self {
        Self {
            label: label.into(),
            data_type,
        }
    }

    pub fn time(label: impl Into<String>) -> Self {
        Self::new(label, time_data_type())
    }

    pub fn float(label: impl Into<String>) -> Self {
        Self::new(label, DataType::Float64)
    }

    pub fn int(label: impl Into<String>) -> Self {
        Self::new(label, DataType::Int64)
    }

    pub fn string(label: impl Into<String>) -> Self {
        Self::new(label, DataType::Utf8)
    }
}

/// A table written out row by row.
///
/// Key values come from `key_values` when set, otherwise from the first row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestTable {
    pub key_cols: Vec<String>,
    pub key_values: Option<Vec<ScalarValue>>,
    pub columns: Vec<ColMeta>,
    pub data: Vec<Vec<ScalarValue>>,
    /// Partition of a parallel source that emits this table.
    pub resides_on_partition: Option<usize>,
}

impl TestTable {
    fn column_position(&self, label: &str) -> RillResult<usize> {
        self.columns
            .iter()
            .position(|c| c.label == label)
            .ok_or_else(|| RillError::schema_error(format!("test table has no column {label:?}")))
    }

    /// The table's group key.
    pub fn key(&self) -> RillResult<GroupKey> {
        let mut columns = Vec::with_capacity(self.key_cols.len());
        for (i, label) in self.key_cols.iter().enumerate() {
            let idx = self.column_position(label)?;
            let value = match &self.key_values {
                Some(values) => values.get(i).cloned().ok_or_else(|| {
                    RillError::schema_error(format!("missing key value for {label:?}"))
                })?,
                None => self
                    .data
                    .first()
                    .and_then(|row| row.get(idx))
                    .cloned()
                    .unwrap_or(ScalarValue::Null),
            };
            columns.push((label.clone(), value));
        }
        Ok(GroupKey::new(columns))
    }

    /// Arrow schema of the table.
    pub fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.label.clone(), c.data_type.clone(), true))
                .collect::<Vec<_>>(),
        ))
    }

    /// Convert to an engine table with one chunk.
    pub fn to_table(&self) -> RillResult<Table> {
        let key = self.key()?;
        let schema = self.schema();
        if self.data.is_empty() {
            return Ok(Table::empty(key, schema));
        }
        let mut arrays = Vec::with_capacity(self.columns.len());
        for (idx, col) in self.columns.iter().enumerate() {
            let mut values = Vec::with_capacity(self.data.len());
            for (r, row) in self.data.iter().enumerate() {
                let value = row.get(idx).ok_or_else(|| {
                    RillError::schema_error(format!(
                        "row {r} has {} values, expected {}",
                        row.len(),
                        self.columns.len()
                    ))
                })?;
                values.push(value);
            }
            arrays.push(iter_to_array(&col.data_type, values)?);
        }
        let batch = RecordBatch::try_new(schema.clone(), arrays)?;
        Table::try_new(key, schema, vec![batch])
    }

    /// Convert to a source table for the in-memory `from` source.
    pub fn to_source_table(&self) -> RillResult<SourceTable> {
        Ok(SourceTable::new(self.to_table()?).on_partition(self.resides_on_partition))
    }

    /// Read back an engine table.
    pub fn from_table(table: &Table) -> RillResult<Self> {
        let columns = table
            .schema()
            .fields()
            .iter()
            .map(|f| ColMeta::new(f.name().clone(), f.data_type().clone()))
            .collect();
        let mut data = Vec::with_capacity(table.num_rows());
        table.do_chunks(|chunk| {
            for row in 0..chunk.num_rows() {
                let values = chunk
                    .columns()
                    .iter()
                    .map(|array| ScalarValue::try_from_array(array.as_ref(), row))
                    .collect::<RillResult<Vec<_>>>()?;
                data.push(values);
            }
            Ok(())
        })?;
        Ok(Self {
            key_cols: table.key().labels().map(str::to_string).collect(),
            key_values: None,
            columns,
            data,
            resides_on_partition: None,
        })
    }
}

/// Sort tables by group key and renumber `_parallel_group` values in the
/// order they are first seen, so results from different runs compare equal.
pub fn normalize_tables(tables: &mut [TestTable]) {
    tables.sort_by_cached_key(|t| t.key().unwrap_or_default());
    let mut groups: HashMap<ScalarValue, i64> = HashMap::new();
    for table in tables.iter_mut() {
        let Some(idx) = table
            .columns
            .iter()
            .position(|c| c.label == PARALLEL_GROUP_COLUMN)
        else {
            continue;
        };
        for row in &mut table.data {
            if let Some(value) = row.get_mut(idx) {
                if value.is_null() {
                    continue;
                }
                let next = i64::try_from(groups.len()).unwrap_or(i64::MAX);
                let renumbered = *groups.entry(value.clone()).or_insert(next);
                *value = ScalarValue::Int(renumbered);
            }
        }
    }
}

/// A windowed table keyed by `_start`/`_stop` with one `_value` per row.
pub fn window_table(start: i64, stop: i64, values: &[f64]) -> Table {
    let test = TestTable {
        key_cols: vec![DEFAULT_START_COLUMN.to_string(), DEFAULT_STOP_COLUMN.to_string()],
        key_values: Some(vec![
            ScalarValue::Time(Time::new(start)),
            ScalarValue::Time(Time::new(stop)),
        ]),
        columns: vec![
            ColMeta::time(DEFAULT_START_COLUMN),
            ColMeta::time(DEFAULT_STOP_COLUMN),
            ColMeta::time("_time"),
            ColMeta::float("_value"),
        ],
        data: values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                vec![
                    ScalarValue::Time(Time::new(start)),
                    ScalarValue::Time(Time::new(stop)),
                    ScalarValue::Time(Time::new(start + i as i64)),
                    ScalarValue::Float(*v),
                ]
            })
            .collect(),
        resides_on_partition: None,
    };
    match test.to_table() {
        Ok(table) => table,
        Err(e) => panic!("invalid window table: {e}"),
    }
}

/// One call received by a [`RecordingTransformation`].
#[derive(Debug, Clone)]
pub enum Event {
    Process(Table),
    Retract(GroupKey),
    Watermark(Time),
    ProcessingTime(Time),
    Finish(Option<RillError>),
}

/// A transformation that records every call it receives.
#[derive(Debug, Default)]
pub struct RecordingTransformation {
    events: Mutex<Vec<(DatasetId, Event)>>,
    fail_process: Option<RillError>,
}

impl RecordingTransformation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose `process` always fails with `err`.
    pub fn failing(err: RillError) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_process: Some(err),
        }
    }

    fn record(&self, parent: &DatasetId, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((parent.clone(), event));
    }

    /// Every event in arrival order.
    pub fn events(&self) -> Vec<Event> {
        self.events_from()
            .into_iter()
            .map(|(_, event)| event)
            .collect()
    }

    /// Every event with the parent that sent it.
    pub fn events_from(&self) -> Vec<(DatasetId, Event)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tables received, in order.
    pub fn tables(&self) -> Vec<Table> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Process(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Watermarks received, in order.
    pub fn watermarks(&self) -> Vec<Time> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Watermark(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Processing times received, in order.
    pub fn processing_times(&self) -> Vec<Time> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ProcessingTime(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Finish signals received.
    pub fn finishes(&self) -> Vec<Option<RillError>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Finish(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    /// Drop every recorded event, releasing any tables held.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Transformation for RecordingTransformation {
    async fn process(&self, parent: &DatasetId, table: Table) -> RillResult<()> {
        if let Some(err) = &self.fail_process {
            return Err(err.clone());
        }
        self.record(parent, Event::Process(table));
        Ok(())
    }

    async fn retract_table(&self, parent: &DatasetId, key: &GroupKey) -> RillResult<()> {
        self.record(parent, Event::Retract(key.clone()));
        Ok(())
    }

    async fn update_watermark(&self, parent: &DatasetId, time: Time) -> RillResult<()> {
        self.record(parent, Event::Watermark(time));
        Ok(())
    }

    async fn update_processing_time(&self, parent: &DatasetId, time: Time) -> RillResult<()> {
        self.record(parent, Event::ProcessingTime(time));
        Ok(())
    }

    async fn finish(&self, parent: &DatasetId, err: Option<RillError>) {
        self.record(parent, Event::Finish(err));
    }
}
