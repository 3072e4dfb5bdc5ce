//! Group-key buffering dataset with triggers and accumulation modes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, trace};
use tokio::sync::Mutex;

use common_error::{RillError, RillResult};

use super::{Dataset, DatasetId, Downstream, Transformation};
use crate::memory::ResourceAllocator;
use crate::table::{DEFAULT_STOP_COLUMN, GroupKey, Table, TableBuilder, Time};

/// When buffered tables are emitted. Every trigger also fires on finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Emit a key once the watermark reaches the key's stop time.
    AfterWatermark { stop_column: String },
    /// Emit a key once processing time is `delay` past its first buffered table.
    AfterProcessingTime { delay: Duration },
    /// Emit on every table.
    Narrow,
}

impl Trigger {
    /// Watermark trigger on the default `_stop` column.
    pub fn after_watermark() -> Self {
        Self::AfterWatermark {
            stop_column: DEFAULT_STOP_COLUMN.to_string(),
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::after_watermark()
    }
}

/// What happens to a key's buffer once it has been emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulationMode {
    /// Drop the buffer.
    #[default]
    Discarding,
    /// Keep the buffer; a later emission retracts the earlier table first.
    Accumulating,
}

#[derive(Debug)]
struct CacheEntry {
    builder: TableBuilder,
    /// Processing time when the pending rows started buffering.
    since: Time,
    /// Rows appended since the last emission.
    dirty: bool,
    /// A table for this key has been sent downstream.
    emitted: bool,
}

/// Insertion-ordered per-key table builders.
#[derive(Debug)]
pub struct TableCache {
    entries: IndexMap<GroupKey, CacheEntry>,
    allocator: Arc<ResourceAllocator>,
}

impl TableCache {
    /// Create an empty cache accounting against `allocator`.
    pub fn new(allocator: Arc<ResourceAllocator>) -> Self {
        Self {
            entries: IndexMap::new(),
            allocator,
        }
    }

    /// Number of buffered keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows buffered for `key`.
    pub fn buffered_rows(&self, key: &GroupKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.builder.num_rows())
    }

    /// Bytes held by all builders.
    pub fn reserved_bytes(&self) -> usize {
        self.entries.values().map(|e| e.builder.reserved_bytes()).sum()
    }

    /// Buffer `table` under its key. `now` is the current processing time.
    pub fn append(&mut self, table: &Table, now: Time) -> RillResult<()> {
        let allocator = &self.allocator;
        let entry = self
            .entries
            .entry(table.key().clone())
            .or_insert_with(|| CacheEntry {
                builder: TableBuilder::new(table.key().clone(), table.schema().clone(), allocator),
                since: now,
                dirty: false,
                emitted: false,
            });
        entry.builder.append(table)?;
        if !entry.dirty {
            entry.since = now;
            entry.dirty = true;
        }
        Ok(())
    }

    /// Drop the buffer for `key`, returning whether it had been emitted.
    pub fn discard(&mut self, key: &GroupKey) -> Option<bool> {
        self.entries.shift_remove(key).map(|e| e.emitted)
    }

    /// Drop every buffer.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn ready_keys(&self, trigger: &Trigger, watermark: Time, now: Time, finishing: bool) -> Vec<GroupKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .filter(|(key, e)| {
                finishing
                    || match trigger {
                        Trigger::Narrow => true,
                        Trigger::AfterWatermark { stop_column } => key
                            .value(stop_column)
                            .and_then(|v| v.as_time())
                            .is_some_and(|stop| stop <= watermark),
                        Trigger::AfterProcessingTime { delay } => now >= e.since + *delay,
                    }
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[derive(Debug)]
struct CacheState {
    cache: TableCache,
    watermark: Time,
    processing_time: Time,
}

/// A dataset that buffers tables per group key and emits them when its
/// trigger fires.
#[derive(Debug)]
pub struct CachedDataset {
    id: DatasetId,
    trigger: Trigger,
    mode: AccumulationMode,
    downstream: Downstream,
    state: Mutex<CacheState>,
    finished: AtomicBool,
}

impl CachedDataset {
    /// Create a dataset buffering against `allocator`.
    pub fn new(
        id: DatasetId,
        trigger: Trigger,
        mode: AccumulationMode,
        allocator: Arc<ResourceAllocator>,
    ) -> Self {
        Self {
            id,
            trigger,
            mode,
            downstream: Downstream::new(),
            state: Mutex::new(CacheState {
                cache: TableCache::new(allocator),
                watermark: Time::MIN,
                processing_time: Time::MIN,
            }),
            finished: AtomicBool::new(false),
        }
    }

    /// The trigger in use.
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// The accumulation mode in use.
    pub fn mode(&self) -> AccumulationMode {
        self.mode
    }

    /// Number of keys currently buffered.
    pub async fn buffered_keys(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    /// Bytes currently buffered.
    pub async fn reserved_bytes(&self) -> usize {
        self.state.lock().await.cache.reserved_bytes()
    }

    fn ensure_open(&self) -> RillResult<()> {
        if self.is_finished() {
            return Err(RillError::execution(format!(
                "dataset {} already finished",
                self.id
            )));
        }
        Ok(())
    }

    async fn emit_ready(&self, state: &mut CacheState, finishing: bool) -> RillResult<()> {
        let ready = state.cache.ready_keys(
            &self.trigger,
            state.watermark,
            state.processing_time,
            finishing,
        );
        for key in ready {
            let (table, retract) = {
                let Some(entry) = state.cache.entries.get_mut(&key) else {
                    continue;
                };
                let table = entry.builder.build()?;
                let retract = entry.emitted;
                entry.emitted = true;
                entry.dirty = false;
                (table, retract)
            };
            if self.mode == AccumulationMode::Discarding {
                state.cache.discard(&key);
            }

            trace!("{}: emitting {} rows for {}", self.id, table.num_rows(), key);
            if retract {
                self.downstream.retract_table(&self.id, &key).await?;
            }
            self.downstream.process(&self.id, table).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Dataset for CachedDataset {
    fn id(&self) -> &DatasetId {
        &self.id
    }

    fn add_transformation(&self, transformation: Arc<dyn Transformation>) {
        self.downstream.add(transformation);
    }

    async fn process(&self, table: Table) -> RillResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        let now = state.processing_time;
        state.cache.append(&table, now)?;
        if self.trigger == Trigger::Narrow {
            self.emit_ready(&mut state, false).await?;
        }
        Ok(())
    }

    async fn retract_table(&self, key: &GroupKey) -> RillResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        state.cache.discard(key);
        self.downstream.retract_table(&self.id, key).await
    }

    async fn update_watermark(&self, time: Time) -> RillResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        if time <= state.watermark {
            return Ok(());
        }
        state.watermark = time;
        self.emit_ready(&mut state, false).await?;
        self.downstream.update_watermark(&self.id, time).await
    }

    async fn update_processing_time(&self, time: Time) -> RillResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        if time <= state.processing_time {
            return Ok(());
        }
        state.processing_time = time;
        self.emit_ready(&mut state, false).await?;
        self.downstream.update_processing_time(&self.id, time).await
    }

    async fn finish(&self, err: Option<RillError>) {
        let mut state = self.state.lock().await;
        if self.finished.load(Ordering::SeqCst) {
            debug!("{}: ignoring repeated finish", self.id);
            return;
        }

        let err = match err {
            Some(err) => Some(err),
            None => self.emit_ready(&mut state, true).await.err(),
        };
        self.finished.store(true, Ordering::SeqCst);
        state.cache.clear();
        debug!("{}: finished", self.id);
        self.downstream.finish(&self.id, err).await;
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
