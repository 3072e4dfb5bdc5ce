//! Local executor: builds the operator graph and drives source workers.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use indexmap::IndexMap;
use log::{debug, info};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use common_error::{RillError, RillResult};
use common_runtime::JoinSet;
use rill_plan::{NodeId, PhysicalPlanNode, PlanSpec, validate_attributes};

use super::{ExecutionContext, ExecutionState, QueryResult, QueryState, ResultRegistry, RuntimeConfig};
use crate::dataflow::{Dataset, DatasetId, Source, Transformation};
use crate::memory::ResourceAllocator;
use crate::metrics::{MetricsSink, OperatorMetrics};
use crate::registry::{Administration, TransformationRegistry};

/// Output side of one built instance.
enum Output {
    Source(Arc<dyn Source>),
    Dataset(Arc<dyn Dataset>),
    Sink,
}

impl Output {
    fn subscribe(&self, child: &DatasetId, transformation: Arc<dyn Transformation>) -> RillResult<()> {
        match self {
            Self::Source(source) => source.add_transformation(transformation),
            Self::Dataset(dataset) => dataset.add_transformation(transformation),
            Self::Sink => {
                return Err(RillError::invalid_plan(format!(
                    "{child} consumes the output of a sink"
                )));
            }
        }
        Ok(())
    }
}

/// Executes physical plans on the current tokio runtime.
///
/// Every source instance runs on its own worker task; at most
/// `concurrency_quota` workers run at once. Everything downstream of a source
/// runs inside the worker that pushes into it.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: TransformationRegistry,
    config: RuntimeConfig,
}

impl Executor {
    /// An executor with the built-in operators.
    pub fn new() -> Self {
        Self::with_registry(TransformationRegistry::with_builtins())
    }

    /// An executor using `registry` to build operators.
    pub fn with_registry(registry: TransformationRegistry) -> Self {
        Self {
            registry,
            config: RuntimeConfig::default(),
        }
    }

    /// Replace the runtime configuration.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &TransformationRegistry {
        &self.registry
    }

    /// Start `plan` with an allocator sized from the plan's resource quotas.
    pub fn execute(&self, plan: &PlanSpec) -> RillResult<RunningQuery> {
        let allocator = Arc::new(ResourceAllocator::from_resources(plan.resources()));
        self.execute_with_allocator(plan, allocator)
    }

    /// Start `plan` against `allocator`.
    ///
    /// Returns once the graph is built and the workers are spawned. Plans
    /// failing validation or construction are rejected before any data flows.
    pub fn execute_with_allocator(
        &self,
        plan: &PlanSpec,
        allocator: Arc<ResourceAllocator>,
    ) -> RillResult<RunningQuery> {
        Handle::try_current().map_err(|e| {
            RillError::internal(format!("executor requires a tokio runtime: {e}"))
        })?;
        let started = Instant::now();
        let state = Arc::new(ExecutionState::new());
        let ctx = ExecutionContext::with_state(Arc::clone(&allocator), Arc::clone(&state))
            .with_config(self.config.clone())
            .with_now(plan.now());

        if let Err(err) = self.validate(plan) {
            state.fail(err.clone());
            state.transition(QueryState::Failed);
            return Err(err);
        }

        state.transition(QueryState::Building);
        let registry = ResultRegistry::new(self.config.result_buffer_size, ctx.cancel_receiver());
        let sources = match self.build(plan, &ctx, &registry) {
            Ok(sources) => sources,
            Err(err) => {
                state.fail(err.clone());
                state.transition(QueryState::Failed);
                return Err(err);
            }
        };
        let results = registry.into_results(&state);

        state.transition(QueryState::Running);
        info!(
            "starting query: {} nodes, {} source workers, results {:?}",
            plan.len(),
            sources.len(),
            results.keys().collect::<Vec<_>>()
        );

        let permits = Arc::new(Semaphore::new(plan.resources().concurrency_quota));
        let mut workers = JoinSet::new();
        for source in sources {
            let ctx = ctx.clone();
            let permits = Arc::clone(&permits);
            workers.spawn(async move {
                // The graph below `source` is dropped with this task, so a
                // panic is recorded while the result streams are still open.
                let result = AssertUnwindSafe(run_worker(source.as_ref(), &ctx, permits))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(RillError::internal(format!(
                            "worker {} panicked: {}",
                            source.id(),
                            panic_message(payload.as_ref())
                        )))
                    });
                if let Err(err) = &result {
                    ctx.state().fail(err.clone());
                }
                result
            });
        }

        Ok(RunningQuery {
            state,
            workers,
            results,
            metrics: ctx.metrics().cloned(),
            allocator,
            check_leaks: self.config.check_leaks,
            started,
        })
    }

    fn validate(&self, plan: &PlanSpec) -> RillResult<()> {
        plan.resources().validate()?;
        validate_attributes(plan)?;
        for node in plan.nodes() {
            if !self.registry.contains(&node.kind()) {
                return Err(RillError::invalid_plan(format!(
                    "unknown procedure kind {:?} on node {}",
                    node.kind().as_str(),
                    node.id()
                )));
            }
        }
        Ok(())
    }

    /// Instantiate every node in topological order and wire instances to
    /// their parents. Returns the source instances.
    fn build(
        &self,
        plan: &PlanSpec,
        ctx: &ExecutionContext,
        results: &ResultRegistry,
    ) -> RillResult<Vec<Arc<dyn Source>>> {
        let mut instances: HashMap<NodeId, Vec<DatasetId>> = HashMap::new();
        let mut outputs: HashMap<DatasetId, Output> = HashMap::new();
        let mut sources = Vec::new();

        for node in plan.topological_order() {
            let factor = plan.parallel_factor(node.id());
            let is_source = self.registry.is_source(&node.kind());
            let has_predecessors = !plan.predecessors(node.id()).is_empty();
            if is_source && has_predecessors {
                return Err(RillError::invalid_plan(format!(
                    "source {} has predecessors",
                    node.id()
                )));
            }
            if !is_source && !has_predecessors {
                return Err(RillError::invalid_plan(format!(
                    "{} {} has no predecessors",
                    node.kind(),
                    node.id()
                )));
            }

            let mut ids = Vec::with_capacity(factor);
            for partition in 0..factor {
                let id = DatasetId::instance(node.id(), partition, factor);
                let parents = parents_of(plan, node, partition, factor, &instances)?;
                let admin =
                    Administration::new(ctx, node.id(), parents, partition, factor, results);
                if is_source {
                    let source = self.registry.create_source(&id, node.spec().as_ref(), &admin)?;
                    outputs.insert(id.clone(), Output::Source(Arc::clone(&source)));
                    sources.push(source);
                } else {
                    let (transformation, dataset) =
                        self.registry
                            .create_transformation(&id, node.spec().as_ref(), &admin)?;
                    for parent in admin.parents() {
                        let output = outputs.get(parent).ok_or_else(|| {
                            RillError::internal(format!("{parent} was not built before {id}"))
                        })?;
                        output.subscribe(&id, Arc::clone(&transformation))?;
                    }
                    outputs.insert(id.clone(), dataset.map_or(Output::Sink, Output::Dataset));
                }
                debug!("built {} instance {id}", node.kind());
                ids.push(id);
            }
            instances.insert(node.id().clone(), ids);
        }
        Ok(sources)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

/// Parent instances of instance `partition` of `node`.
///
/// A parallel node reads the same-index instance of each predecessor, which
/// must run with the same factor. A node running once reads every instance.
fn parents_of(
    plan: &PlanSpec,
    node: &PhysicalPlanNode,
    partition: usize,
    factor: usize,
    instances: &HashMap<NodeId, Vec<DatasetId>>,
) -> RillResult<Vec<DatasetId>> {
    let mut parents = Vec::new();
    for pred in plan.predecessors(node.id()) {
        let pred_instances = instances.get(pred.id()).ok_or_else(|| {
            RillError::internal(format!("{} was not built before {}", pred.id(), node.id()))
        })?;
        if factor <= 1 {
            parents.extend(pred_instances.iter().cloned());
        } else if pred_instances.len() == factor {
            parents.push(pred_instances[partition].clone());
        } else {
            return Err(RillError::invalid_plan(format!(
                "{} runs with parallel factor {factor} but its predecessor {} runs with {}",
                node.id(),
                pred.id(),
                pred_instances.len()
            )));
        }
    }
    Ok(parents)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}

async fn run_worker(
    source: &dyn Source,
    ctx: &ExecutionContext,
    permits: Arc<Semaphore>,
) -> RillResult<()> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|e| RillError::internal(format!("worker permits closed: {e}")))?;
    debug!("worker {} started", source.id());
    let result = source.run(ctx).await;
    debug!("worker {} stopped", source.id());
    result
}

/// A query whose workers are running.
#[derive(Debug)]
pub struct RunningQuery {
    state: Arc<ExecutionState>,
    workers: JoinSet<RillResult<()>>,
    results: IndexMap<String, QueryResult>,
    metrics: Option<MetricsSink>,
    allocator: Arc<ResourceAllocator>,
    check_leaks: bool,
    started: Instant,
}

impl RunningQuery {
    /// Take every result stream, keyed by name in plan order.
    pub fn take_results(&mut self) -> IndexMap<String, QueryResult> {
        std::mem::take(&mut self.results)
    }

    /// Take one result stream.
    pub fn take_result(&mut self, name: &str) -> Option<QueryResult> {
        self.results.shift_remove(name)
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> QueryState {
        self.state.phase()
    }

    /// Cancel the query. Result streams end with a `Cancelled` error unless
    /// the query already failed.
    pub fn cancel(&self) {
        self.state
            .fail(RillError::cancelled("query cancelled by caller"));
    }

    /// Wait for every worker and settle the final state.
    pub async fn wait(&mut self) -> RillResult<()> {
        for joined in self.workers.join_all().await {
            if let Err(err) = joined {
                self.state.fail(err);
            }
        }
        match self.state.error() {
            Some(err) => {
                self.state.transition(QueryState::Failed);
                Err(err)
            }
            None => {
                self.state.transition(QueryState::Succeeded);
                info!("query succeeded in {:?}", self.started.elapsed());
                Ok(())
            }
        }
    }

    /// Stop the query and release its resources.
    ///
    /// Workers still running are cancelled. The query's own outcome is
    /// reported by [`RunningQuery::err`]; this returns an error only when the
    /// leak check is enabled and memory is still allocated.
    pub async fn done(&mut self) -> RillResult<()> {
        self.state.cancel_handle().cancel();
        if let Err(err) = self.wait().await {
            debug!("query ended with error: {err}");
        }
        self.results.clear();
        if self.check_leaks {
            self.allocator.check_leaks()?;
        }
        Ok(())
    }

    /// The terminal error, if the query failed.
    pub fn err(&self) -> Option<RillError> {
        self.state.error()
    }

    /// Per-dataset metrics collected so far.
    pub fn statistics(&self) -> HashMap<String, OperatorMetrics> {
        self.metrics.as_ref().map(MetricsSink::all).unwrap_or_default()
    }

    /// The metrics sink, if metrics are collected.
    pub fn metrics(&self) -> Option<&MetricsSink> {
        self.metrics.as_ref()
    }

    /// The query allocator.
    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }
}
