//! Programs, running queries and result iteration.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use indexmap::IndexMap;

use common_error::{RillError, RillResult};
use rill_plan::PlanSpec;

use crate::executor::{Executor, QueryResult, RunningQuery};
use crate::memory::ResourceAllocator;
use crate::metrics::OperatorMetrics;
use crate::table::Table;

/// A running query as seen by its consumer.
#[async_trait]
pub trait Query: Send {
    /// Take the result streams. Later calls return an empty map.
    fn results(&mut self) -> IndexMap<String, QueryResult>;

    /// Stop the query and release its resources.
    async fn done(&mut self) -> RillResult<()>;

    /// Cancel the query.
    fn cancel(&self);

    /// The terminal error, if the query failed.
    fn err(&self) -> Option<RillError>;

    /// Per-dataset metrics.
    fn statistics(&self) -> HashMap<String, OperatorMetrics>;
}

#[async_trait]
impl Query for RunningQuery {
    fn results(&mut self) -> IndexMap<String, QueryResult> {
        self.take_results()
    }

    async fn done(&mut self) -> RillResult<()> {
        RunningQuery::done(self).await
    }

    fn cancel(&self) {
        RunningQuery::cancel(self);
    }

    fn err(&self) -> Option<RillError> {
        RunningQuery::err(self)
    }

    fn statistics(&self) -> HashMap<String, OperatorMetrics> {
        RunningQuery::statistics(self)
    }
}

/// Something that can be started as a query.
pub trait Program: Send + Sync {
    /// Start the program, accounting memory against `allocator`.
    fn start(&self, allocator: Arc<ResourceAllocator>) -> RillResult<Box<dyn Query>>;
}

/// A physical plan paired with the executor that runs it.
#[derive(Debug, Clone)]
pub struct PlanProgram {
    plan: PlanSpec,
    executor: Executor,
}

impl PlanProgram {
    /// Run `plan` with the built-in operators.
    pub fn new(plan: PlanSpec) -> Self {
        Self::with_executor(plan, Executor::new())
    }

    pub fn with_executor(plan: PlanSpec, executor: Executor) -> Self {
        Self { plan, executor }
    }

    pub fn plan(&self) -> &PlanSpec {
        &self.plan
    }
}

impl Program for PlanProgram {
    fn start(&self, allocator: Arc<ResourceAllocator>) -> RillResult<Box<dyn Query>> {
        let query = self.executor.execute_with_allocator(&self.plan, allocator)?;
        Ok(Box::new(query))
    }
}

/// Walks the result streams of a query one at a time.
pub struct ResultIterator {
    query: Box<dyn Query>,
    results: VecDeque<QueryResult>,
    released: bool,
}

impl ResultIterator {
    pub fn new(mut query: Box<dyn Query>) -> Self {
        let results = query.results().into_values().collect();
        Self {
            query,
            results,
            released: false,
        }
    }

    /// Whether another result stream is available.
    pub fn more(&self) -> bool {
        !self.released && !self.results.is_empty()
    }

    /// The next result stream, in plan order.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<QueryResult> {
        if self.released {
            return None;
        }
        self.results.pop_front()
    }

    /// Drop the remaining streams and stop the query. Only the first call
    /// has an effect.
    pub async fn release(&mut self) -> RillResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.results.clear();
        self.query.done().await
    }

    /// The query's terminal error.
    pub fn err(&self) -> Option<RillError> {
        self.query.err()
    }

    /// Per-dataset metrics of the query.
    pub fn statistics(&self) -> HashMap<String, OperatorMetrics> {
        self.query.statistics()
    }
}

impl std::fmt::Debug for ResultIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultIterator")
            .field("pending", &self.results.len())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Run `program` to completion, calling `f` for every result table, then
/// verify that every byte the query allocated was released.
///
/// Every result stream is drained concurrently. Tables are dropped after `f`
/// returns. The first error from `f` or from the query is returned; a clean
/// run that leaks memory fails with `MemoryLeak`.
pub async fn run_checked<F>(program: &dyn Program, mut f: F) -> RillResult<()>
where
    F: FnMut(&str, &Table) -> RillResult<()>,
{
    let allocator = Arc::new(ResourceAllocator::unlimited());
    let query = program.start(Arc::clone(&allocator))?;
    let mut results = ResultIterator::new(query);

    let mut streams = Vec::new();
    while let Some(result) = results.next() {
        let name: Arc<str> = Arc::from(result.name());
        streams.push(
            result
                .into_stream()
                .map(move |item| (Arc::clone(&name), item)),
        );
    }

    // A full stream blocks every worker feeding it, so all are read at once.
    let mut merged = futures::stream::select_all(streams);
    let mut failure = None;
    while let Some((name, item)) = merged.next().await {
        if let Err(err) = item.and_then(|table| f(&name, &table)) {
            failure = Some(err);
            break;
        }
    }
    drop(merged);
    results.release().await?;

    if let Some(err) = failure.or_else(|| results.err()) {
        return Err(err);
    }
    allocator.check_leaks()
}
