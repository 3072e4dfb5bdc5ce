//! Operator constructors keyed by procedure kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use common_error::{RillError, RillResult};
use rill_plan::{NodeId, ProcedureKind, ProcedureSpec};

use crate::dataflow::{Dataset, DatasetId, Source, Transformation};
use crate::executor::{ExecutionContext, ResultRegistry, ResultSender};
use crate::memory::ResourceAllocator;
use crate::operators::{self, FILTER_KIND, FROM_KIND, PARTITION_MERGE_KIND, YIELD_KIND};

/// Builds one transformation instance and its output dataset. Sinks have no
/// output dataset.
pub type TransformationConstructor = Arc<
    dyn Fn(
            &DatasetId,
            &dyn ProcedureSpec,
            &Administration<'_>,
        ) -> RillResult<(Arc<dyn Transformation>, Option<Arc<dyn Dataset>>)>
        + Send
        + Sync,
>;

/// Builds one source instance.
pub type SourceConstructor = Arc<
    dyn Fn(&DatasetId, &dyn ProcedureSpec, &Administration<'_>) -> RillResult<Arc<dyn Source>>
        + Send
        + Sync,
>;

/// What a constructor may know about the instance it builds.
#[derive(Debug)]
pub struct Administration<'a> {
    ctx: &'a ExecutionContext,
    node: &'a NodeId,
    parents: Vec<DatasetId>,
    partition: usize,
    parallel_factor: usize,
    results: &'a ResultRegistry,
}

impl<'a> Administration<'a> {
    pub(crate) fn new(
        ctx: &'a ExecutionContext,
        node: &'a NodeId,
        parents: Vec<DatasetId>,
        partition: usize,
        parallel_factor: usize,
        results: &'a ResultRegistry,
    ) -> Self {
        Self {
            ctx,
            node,
            parents,
            partition,
            parallel_factor,
            results,
        }
    }

    /// The query's execution context.
    pub fn context(&self) -> &ExecutionContext {
        self.ctx
    }

    /// The query allocator.
    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        self.ctx.allocator()
    }

    /// The plan node being instantiated.
    pub fn node(&self) -> &NodeId {
        self.node
    }

    /// Datasets this instance consumes, in plan order.
    pub fn parents(&self) -> &[DatasetId] {
        &self.parents
    }

    /// Index of this instance within its parallel region.
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Number of instances of the node.
    pub fn parallel_factor(&self) -> usize {
        self.parallel_factor
    }

    /// Obtain a sender for the result stream `name`.
    pub fn register_result(&self, name: &str) -> RillResult<ResultSender> {
        self.results.register(name, self.node)
    }
}

/// Maps procedure kinds to constructors.
#[derive(Clone, Default)]
pub struct TransformationRegistry {
    transformations: HashMap<ProcedureKind, TransformationConstructor>,
    sources: HashMap<ProcedureKind, SourceConstructor>,
}

impl TransformationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in operator.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_source(FROM_KIND, Arc::new(operators::from::create));
        registry.register_transformation(FILTER_KIND, Arc::new(operators::filter::create));
        registry.register_transformation(
            PARTITION_MERGE_KIND,
            Arc::new(operators::partition_merge::create),
        );
        registry.register_transformation(YIELD_KIND, Arc::new(operators::yield_sink::create));
        registry
    }

    /// Register or replace a transformation constructor.
    pub fn register_transformation(
        &mut self,
        kind: impl Into<ProcedureKind>,
        constructor: TransformationConstructor,
    ) {
        self.transformations.insert(kind.into(), constructor);
    }

    /// Register or replace a source constructor.
    pub fn register_source(&mut self, kind: impl Into<ProcedureKind>, constructor: SourceConstructor) {
        self.sources.insert(kind.into(), constructor);
    }

    /// Whether `kind` is registered as a source.
    pub fn is_source(&self, kind: &ProcedureKind) -> bool {
        self.sources.contains_key(kind)
    }

    /// Whether `kind` is registered at all.
    pub fn contains(&self, kind: &ProcedureKind) -> bool {
        self.is_source(kind) || self.transformations.contains_key(kind)
    }

    /// Build a transformation instance.
    pub fn create_transformation(
        &self,
        id: &DatasetId,
        spec: &dyn ProcedureSpec,
        admin: &Administration<'_>,
    ) -> RillResult<(Arc<dyn Transformation>, Option<Arc<dyn Dataset>>)> {
        let kind = spec.kind();
        let constructor = self.transformations.get(&kind).ok_or_else(|| {
            RillError::invalid_plan(format!("unknown transformation kind {:?}", kind.as_str()))
        })?;
        constructor(id, spec, admin)
    }

    /// Build a source instance.
    pub fn create_source(
        &self,
        id: &DatasetId,
        spec: &dyn ProcedureSpec,
        admin: &Administration<'_>,
    ) -> RillResult<Arc<dyn Source>> {
        let kind = spec.kind();
        let constructor = self.sources.get(&kind).ok_or_else(|| {
            RillError::invalid_plan(format!("unknown source kind {:?}", kind.as_str()))
        })?;
        constructor(id, spec, admin)
    }
}

impl fmt::Debug for TransformationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sources: Vec<_> = self.sources.keys().map(ProcedureKind::as_str).collect();
        let mut transformations: Vec<_> = self
            .transformations
            .keys()
            .map(ProcedureKind::as_str)
            .collect();
        sources.sort_unstable();
        transformations.sort_unstable();
        f.debug_struct("TransformationRegistry")
            .field("sources", &sources)
            .field("transformations", &transformations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{FromProcedureSpec, PartitionMergeProcedureSpec, YieldProcedureSpec};
    use crate::testing::unlimited_allocator;

    #[test]
    fn test_builtins_registered() {
        let registry = TransformationRegistry::with_builtins();
        assert!(registry.is_source(&ProcedureKind::new(FROM_KIND)));
        assert!(!registry.is_source(&ProcedureKind::new(FILTER_KIND)));
        assert!(registry.contains(&ProcedureKind::new(PARTITION_MERGE_KIND)));
        assert!(registry.contains(&ProcedureKind::new(YIELD_KIND)));
        assert!(!registry.contains(&ProcedureKind::new("window")));
    }

    #[test]
    fn test_wrong_spec_type_is_invalid_plan() {
        let registry = TransformationRegistry::with_builtins();
        let ctx = ExecutionContext::new(unlimited_allocator());
        let results = ResultRegistry::new(1, ctx.cancel_receiver());
        let node = NodeId::new("merge");
        let admin = Administration::new(&ctx, &node, Vec::new(), 0, 1, &results);

        // A yield spec reporting the merge kind is rejected by the constructor.
        #[derive(Debug)]
        struct Mislabelled(YieldProcedureSpec);
        impl ProcedureSpec for Mislabelled {
            fn kind(&self) -> ProcedureKind {
                ProcedureKind::new(PARTITION_MERGE_KIND)
            }
            fn as_any(&self) -> &dyn std::any::Any {
                &self.0
            }
        }

        let err = registry
            .create_transformation(&DatasetId::new("merge"), &Mislabelled(YieldProcedureSpec::default()), &admin)
            .unwrap_err();
        assert!(matches!(err, RillError::InvalidPlan(_)));

        assert!(registry
            .create_transformation(&DatasetId::new("merge"), &PartitionMergeProcedureSpec, &admin)
            .is_ok());
    }

    #[test]
    fn test_unknown_kind() {
        let registry = TransformationRegistry::new();
        let ctx = ExecutionContext::new(unlimited_allocator());
        let results = ResultRegistry::new(1, ctx.cancel_receiver());
        let node = NodeId::new("from");
        let admin = Administration::new(&ctx, &node, Vec::new(), 0, 1, &results);
        let err = registry
            .create_source(&DatasetId::new("from"), &FromProcedureSpec::default(), &admin)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"invalid physical query plan; unknown source kind "from""#
        );
    }
}
