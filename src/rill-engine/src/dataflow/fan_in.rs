//! Parent-state bookkeeping for transformations with several parents.

use indexmap::IndexMap;
use log::debug;
use tokio::sync::Mutex;

use common_error::{RillError, RillResult};

use super::{Dataset, DatasetId};
use crate::table::Time;

/// Last signals seen from one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentState {
    pub mark: Time,
    pub processing: Time,
    pub finished: bool,
}

impl Default for ParentState {
    fn default() -> Self {
        Self {
            mark: Time::MIN,
            processing: Time::MIN,
            finished: false,
        }
    }
}

/// Reconciles watermark, processing time and completion across parents.
///
/// The forwarded watermark is the minimum over every parent's latest mark, and
/// the operator is complete once every parent registered at construction has
/// finished. The owner guards this state with its own lock.
#[derive(Debug, Clone)]
pub struct FanInState {
    parents: IndexMap<DatasetId, ParentState>,
    finished: bool,
}

impl FanInState {
    /// Track the given parents.
    pub fn new(parents: impl IntoIterator<Item = DatasetId>) -> Self {
        Self {
            parents: parents
                .into_iter()
                .map(|id| (id, ParentState::default()))
                .collect(),
            finished: false,
        }
    }

    /// Number of tracked parents.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Whether no parents are tracked.
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// State of one parent.
    pub fn parent(&self, id: &DatasetId) -> Option<&ParentState> {
        self.parents.get(id)
    }

    fn parent_mut(&mut self, id: &DatasetId) -> RillResult<&mut ParentState> {
        self.parents
            .get_mut(id)
            .ok_or_else(|| RillError::internal(format!("unknown parent dataset {id}")))
    }

    /// Record `parent`'s watermark and return the minimum across parents.
    pub fn update_watermark(&mut self, parent: &DatasetId, mark: Time) -> RillResult<Time> {
        self.parent_mut(parent)?.mark = mark;
        Ok(self.min_watermark())
    }

    /// Record `parent`'s processing time and return the minimum across parents.
    pub fn update_processing_time(&mut self, parent: &DatasetId, time: Time) -> RillResult<Time> {
        self.parent_mut(parent)?.processing = time;
        Ok(self.min_processing_time())
    }

    /// Mark `parent` finished and report whether every parent now is.
    pub fn finish_parent(&mut self, parent: &DatasetId) -> RillResult<bool> {
        self.parent_mut(parent)?.finished = true;
        Ok(self.all_parents_finished())
    }

    /// Minimum watermark across parents.
    pub fn min_watermark(&self) -> Time {
        self.parents
            .values()
            .map(|p| p.mark)
            .min()
            .unwrap_or(Time::MAX)
    }

    /// Minimum processing time across parents.
    pub fn min_processing_time(&self) -> Time {
        self.parents
            .values()
            .map(|p| p.processing)
            .min()
            .unwrap_or(Time::MAX)
    }

    /// Whether every parent has finished.
    pub fn all_parents_finished(&self) -> bool {
        self.parents.values().all(|p| p.finished)
    }

    /// Whether the owning operator has finished its output.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Record that the owning operator finished its output.
    pub fn mark_finished(&mut self) {
        self.finished = true;
    }
}

/// Forwards fan-in signals from several parents into one dataset.
///
/// The watermark and processing time forwarded are the minimum across
/// parents. An error from any parent finishes the output at once; otherwise
/// the output finishes when the last parent does. Calls arriving after that
/// are ignored.
#[derive(Debug)]
pub struct FanIn {
    state: Mutex<FanInState>,
}

impl FanIn {
    /// Track the given parents.
    pub fn new(parents: impl IntoIterator<Item = DatasetId>) -> Self {
        Self {
            state: Mutex::new(FanInState::new(parents)),
        }
    }

    /// Whether the output has been finished.
    pub async fn is_finished(&self) -> bool {
        self.state.lock().await.is_finished()
    }

    /// Record `parent`'s watermark and forward the minimum.
    pub async fn update_watermark(
        &self,
        parent: &DatasetId,
        mark: Time,
        output: &dyn Dataset,
    ) -> RillResult<()> {
        let mut state = self.state.lock().await;
        if state.is_finished() {
            return Ok(());
        }
        let min = state.update_watermark(parent, mark)?;
        output.update_watermark(min).await
    }

    /// Record `parent`'s processing time and forward the minimum.
    pub async fn update_processing_time(
        &self,
        parent: &DatasetId,
        time: Time,
        output: &dyn Dataset,
    ) -> RillResult<()> {
        let mut state = self.state.lock().await;
        if state.is_finished() {
            return Ok(());
        }
        let min = state.update_processing_time(parent, time)?;
        output.update_processing_time(min).await
    }

    /// Record that `parent` finished, finishing `output` when appropriate.
    pub async fn finish(&self, parent: &DatasetId, err: Option<RillError>, output: &dyn Dataset) {
        let mut state = self.state.lock().await;
        if state.is_finished() {
            debug!("{}: ignoring finish from {parent}", output.id());
            return;
        }
        let all_finished = match state.finish_parent(parent) {
            Ok(all) => all,
            Err(e) => {
                state.mark_finished();
                output.finish(Some(e)).await;
                return;
            }
        };
        if err.is_some() || all_finished {
            state.mark_finished();
            output.finish(err).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::dataflow::PassthroughDataset;
    use crate::testing::{Event, RecordingTransformation};

    fn ids(n: usize) -> Vec<DatasetId> {
        (0..n).map(|i| DatasetId::new(format!("p/{i}"))).collect()
    }

    #[test]
    fn test_min_watermark_tracks_slowest_parent() {
        let parents = ids(2);
        let mut state = FanInState::new(parents.clone());

        assert_eq!(state.update_watermark(&parents[0], Time::new(10)).unwrap(), Time::MIN);
        assert_eq!(state.update_watermark(&parents[1], Time::new(4)).unwrap(), Time::new(4));
        assert_eq!(state.update_watermark(&parents[1], Time::new(20)).unwrap(), Time::new(10));
    }

    #[test]
    fn test_all_parents_must_finish() {
        let parents = ids(3);
        let mut state = FanInState::new(parents.clone());

        assert!(!state.finish_parent(&parents[2]).unwrap());
        assert!(!state.finish_parent(&parents[0]).unwrap());
        assert!(state.finish_parent(&parents[1]).unwrap());
    }

    #[test]
    fn test_unknown_parent_is_internal_error() {
        let mut state = FanInState::new(ids(1));
        let err = state
            .update_processing_time(&DatasetId::new("stranger"), Time::ZERO)
            .unwrap_err();
        assert!(matches!(err, RillError::InternalError(_)));
    }

    proptest! {
        #[test]
        fn prop_forwarded_watermark_is_min_of_latest(
            n in 1usize..5,
            updates in proptest::collection::vec((0usize..5, -1_000i64..1_000), 0..60),
        ) {
            let parents = ids(n);
            let mut state = FanInState::new(parents.clone());
            let mut latest = vec![Time::MIN; n];
            for (p, t) in updates {
                let p = p % n;
                latest[p] = Time::new(t);
                let forwarded = state.update_watermark(&parents[p], Time::new(t)).unwrap();
                prop_assert_eq!(forwarded, *latest.iter().min().unwrap());
            }
        }

        #[test]
        fn prop_forwarded_processing_time_is_min_of_latest(
            n in 1usize..5,
            updates in proptest::collection::vec((0usize..5, -1_000i64..1_000), 0..60),
        ) {
            let parents = ids(n);
            let mut state = FanInState::new(parents.clone());
            let mut latest = vec![Time::MIN; n];
            for (p, t) in updates {
                let p = p % n;
                latest[p] = Time::new(t);
                let forwarded = state.update_processing_time(&parents[p], Time::new(t)).unwrap();
                prop_assert_eq!(forwarded, *latest.iter().min().unwrap());
            }
        }
    }

    fn output() -> (PassthroughDataset, Arc<RecordingTransformation>) {
        let ds = PassthroughDataset::new(DatasetId::new("out"));
        let rec = Arc::new(RecordingTransformation::new());
        ds.add_transformation(rec.clone());
        (ds, rec)
    }

    #[tokio::test]
    async fn test_fan_in_finishes_after_last_parent() {
        let parents = ids(2);
        let fan_in = FanIn::new(parents.clone());
        let (ds, rec) = output();

        fan_in.finish(&parents[0], None, &ds).await;
        assert!(!ds.is_finished());
        fan_in.finish(&parents[1], None, &ds).await;
        assert!(ds.is_finished());
        assert!(matches!(rec.events().last(), Some(Event::Finish(None))));
    }

    #[tokio::test]
    async fn test_fan_in_error_finishes_immediately() {
        let parents = ids(3);
        let fan_in = FanIn::new(parents.clone());
        let (ds, rec) = output();

        fan_in
            .finish(&parents[1], Some(RillError::execution("boom")), &ds)
            .await;
        assert!(fan_in.is_finished().await);
        fan_in.finish(&parents[0], None, &ds).await;
        fan_in
            .update_watermark(&parents[2], Time::new(5), &ds)
            .await
            .unwrap();

        let events = rec.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Finish(Some(e)) if e.to_string() == "ExecutionError: boom"));
    }
}
