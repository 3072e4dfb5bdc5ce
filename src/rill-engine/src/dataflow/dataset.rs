//! Datasets: per-node output state that fans results out to children.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use log::{debug, trace};
use tokio::sync::Mutex;

use common_error::{RillError, RillResult};

use super::{DatasetId, Transformation};
use crate::table::{GroupKey, Table, Time};

/// Output side of a running node.
///
/// A dataset is owned by exactly one transformation (or source) and forwards
/// to every transformation registered against it. Watermark and processing
/// time observed downstream never decrease, and `finish` reaches children at
/// most once.
#[async_trait]
pub trait Dataset: Send + Sync + Debug {
    /// Identity of the node instance producing this dataset.
    fn id(&self) -> &DatasetId;

    /// Register a child. Called while the graph is built, before data flows.
    fn add_transformation(&self, transformation: Arc<dyn Transformation>);

    /// Accept one table from the owning transformation.
    async fn process(&self, table: Table) -> RillResult<()>;

    /// Withdraw the table for `key` downstream.
    async fn retract_table(&self, key: &GroupKey) -> RillResult<()>;

    /// Advance the watermark.
    async fn update_watermark(&self, time: Time) -> RillResult<()>;

    /// Advance processing time.
    async fn update_processing_time(&self, time: Time) -> RillResult<()>;

    /// Finish the dataset. Only the first call has an effect.
    async fn finish(&self, err: Option<RillError>);

    /// Whether `finish` has been called.
    fn is_finished(&self) -> bool;
}

/// The transformations subscribed to one dataset.
#[derive(Debug, Default)]
pub struct Downstream {
    transformations: RwLock<Vec<Arc<dyn Transformation>>>,
}

impl Downstream {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a transformation.
    pub fn add(&self, transformation: Arc<dyn Transformation>) {
        self.transformations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transformation);
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.transformations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Transformation>> {
        self.transformations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver a table to every subscriber.
    pub async fn process(&self, from: &DatasetId, table: Table) -> RillResult<()> {
        for t in self.snapshot() {
            t.process(from, table.clone()).await?;
        }
        Ok(())
    }

    /// Deliver a retraction to every subscriber.
    pub async fn retract_table(&self, from: &DatasetId, key: &GroupKey) -> RillResult<()> {
        for t in self.snapshot() {
            t.retract_table(from, key).await?;
        }
        Ok(())
    }

    /// Deliver a watermark to every subscriber.
    pub async fn update_watermark(&self, from: &DatasetId, time: Time) -> RillResult<()> {
        for t in self.snapshot() {
            t.update_watermark(from, time).await?;
        }
        Ok(())
    }

    /// Deliver processing time to every subscriber.
    pub async fn update_processing_time(&self, from: &DatasetId, time: Time) -> RillResult<()> {
        for t in self.snapshot() {
            t.update_processing_time(from, time).await?;
        }
        Ok(())
    }

    /// Deliver the finish signal to every subscriber.
    pub async fn finish(&self, from: &DatasetId, err: Option<RillError>) {
        for t in self.snapshot() {
            t.finish(from, err.clone()).await;
        }
    }
}

#[derive(Debug)]
struct Progress {
    watermark: Time,
    processing_time: Time,
}

/// A dataset that forwards everything as soon as it arrives.
///
/// Calls are serialized, so children see one caller at a time even when the
/// owning transformation is driven by several parents concurrently.
#[derive(Debug)]
pub struct PassthroughDataset {
    id: DatasetId,
    downstream: Downstream,
    progress: Mutex<Progress>,
    finished: AtomicBool,
}

impl PassthroughDataset {
    /// Create a dataset for `id`.
    pub fn new(id: DatasetId) -> Self {
        Self {
            id,
            downstream: Downstream::new(),
            progress: Mutex::new(Progress {
                watermark: Time::MIN,
                processing_time: Time::MIN,
            }),
            finished: AtomicBool::new(false),
        }
    }

    /// Last watermark forwarded.
    pub async fn watermark(&self) -> Time {
        self.progress.lock().await.watermark
    }

    /// Last processing time forwarded.
    pub async fn processing_time(&self) -> Time {
        self.progress.lock().await.processing_time
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
}

#[async_trait]
impl Dataset for PassthroughDataset {
    fn id(&self) -> &DatasetId {
        &self.id
    }

    fn add_transformation(&self, transformation: Arc<dyn Transformation>) {
        self.downstream.add(transformation);
    }

    async fn process(&self, table: Table) -> RillResult<()> {
        let _progress = self.progress.lock().await;
        self.ensure_open()?;
        self.downstream.process(&self.id, table).await
    }

    async fn retract_table(&self, key: &GroupKey) -> RillResult<()> {
        let _progress = self.progress.lock().await;
        self.ensure_open()?;
        self.downstream.retract_table(&self.id, key).await
    }

    async fn update_watermark(&self, time: Time) -> RillResult<()> {
        let mut progress = self.progress.lock().await;
        self.ensure_open()?;
        if time <= progress.watermark {
            return Ok(());
        }
        trace!("{}: watermark {} -> {}", self.id, progress.watermark, time);
        progress.watermark = time;
        self.downstream.update_watermark(&self.id, time).await
    }

    async fn update_processing_time(&self, time: Time) -> RillResult<()> {
        let mut progress = self.progress.lock().await;
        self.ensure_open()?;
        if time <= progress.processing_time {
            return Ok(());
        }
        progress.processing_time = time;
        self.downstream.update_processing_time(&self.id, time).await
    }

    async fn finish(&self, err: Option<RillError>) {
        let _progress = self.progress.lock().await;
        if self.finished.swap(true, Ordering::SeqCst) {
            debug!("{}: ignoring repeated finish", self.id);
            return;
        }
        debug!(
            "{}: finished{}",
            self.id,
            err.as_ref().map_or(String::new(), |e| format!(" with error: {e}"))
        );
        self.downstream.finish(&self.id, err).await;
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
