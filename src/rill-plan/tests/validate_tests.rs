//! Attribute validation tests.
//!
//! Plans mirror the parallel execution fixtures: a partitioned source, an
//! optional partitioned filter, a partition merge and a yield.

use std::any::Any;
use std::sync::Arc;

use rill_plan::{
    PhysicalAttr, PhysicalPlanNode, PlanSpec, ProcedureKind, ProcedureSpec, validate_attributes,
};

#[derive(Debug)]
struct StubSpec(&'static str);

impl ProcedureSpec for StubSpec {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::new(self.0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn node(id: &str, kind: &'static str) -> PhysicalPlanNode {
    PhysicalPlanNode::new(id, Arc::new(StubSpec(kind)))
}

fn chain(nodes: Vec<PhysicalPlanNode>) -> PlanSpec {
    let edges: Vec<(usize, usize)> = (1..nodes.len()).map(|i| (i - 1, i)).collect();
    PlanSpec::from_nodes_and_edges(nodes, &edges).unwrap()
}

fn merge(factor: usize) -> PhysicalPlanNode {
    node("merge", "partitionMerge")
        .with_required_attr(PhysicalAttr::parallel_run(factor))
        .with_output_attr(PhysicalAttr::parallel_merge(factor))
}

fn validation_message(plan: &PlanSpec) -> String {
    validate_attributes(plan).unwrap_err().to_string()
}

#[test]
fn test_parallel_from_then_merge_is_valid() {
    let plan = chain(vec![
        node("from-test", "from").with_output_attr(PhysicalAttr::parallel_run(2)),
        merge(2),
        node("filter", "filter"),
        node("yield", "yield"),
    ]);
    assert!(validate_attributes(&plan).is_ok());
}

#[test]
fn test_parallel_filter_before_merge_is_valid() {
    let plan = chain(vec![
        node("from-test", "from").with_output_attr(PhysicalAttr::parallel_run(2)),
        node("filter", "filter")
            .with_required_attr(PhysicalAttr::parallel_run(2))
            .with_output_attr(PhysicalAttr::parallel_run(2)),
        merge(2),
        node("yield", "yield"),
    ]);
    assert!(validate_attributes(&plan).is_ok());
}

#[test]
fn test_missing_output_attribute() {
    let plan = chain(vec![
        node("from-test", "from"),
        node("filter", "filter")
            .with_required_attr(PhysicalAttr::parallel_run(2))
            .with_output_attr(PhysicalAttr::parallel_run(2)),
        merge(2),
        node("yield", "yield"),
    ]);
    assert_eq!(
        validation_message(&plan),
        "invalid physical query plan; attribute \"parallel-run\" \
         required by \"filter\" is missing from predecessor \"from-test\""
    );
}

#[test]
fn test_missing_required_attribute() {
    let plan = chain(vec![
        node("from-test", "from").with_output_attr(PhysicalAttr::parallel_run(2)),
        node("filter", "filter").with_output_attr(PhysicalAttr::parallel_run(2)),
        merge(2),
        node("yield", "yield"),
    ]);
    assert_eq!(
        validation_message(&plan),
        "invalid physical query plan; attribute \"parallel-run\" \
         on \"from-test\" must be required by all successors, but isn't on \"filter\""
    );
}

#[test]
fn test_factor_mismatch() {
    let plan = chain(vec![
        node("from-test", "from").with_output_attr(PhysicalAttr::parallel_run(2)),
        node("filter", "filter")
            .with_required_attr(PhysicalAttr::parallel_run(1))
            .with_output_attr(PhysicalAttr::parallel_run(1)),
        merge(1),
        node("yield", "yield"),
    ]);
    assert_eq!(
        validation_message(&plan),
        "invalid physical query plan; attribute \"parallel-run\" \
         required by \"filter\" does not match attribute in predecessor \"from-test\""
    );
}

#[test]
fn test_merge_factor_mismatch_on_required_side() {
    let plan = chain(vec![
        node("from-test", "from").with_output_attr(PhysicalAttr::parallel_run(2)),
        merge(3),
        node("yield", "yield"),
    ]);
    assert_eq!(
        validation_message(&plan),
        "invalid physical query plan; attribute \"parallel-run\" \
         required by \"merge\" does not match attribute in predecessor \"from-test\""
    );
}

#[test]
fn test_fan_out_must_be_required_on_every_branch() {
    // from-test feeds two merges; only the first requires the partitioning.
    let plan = PlanSpec::from_nodes_and_edges(
        vec![
            node("from-test", "from").with_output_attr(PhysicalAttr::parallel_run(2)),
            node("merge-a", "partitionMerge").with_required_attr(PhysicalAttr::parallel_run(2)),
            node("plain-b", "filter"),
        ],
        &[(0, 1), (0, 2)],
    )
    .unwrap();
    assert_eq!(
        validation_message(&plan),
        "invalid physical query plan; attribute \"parallel-run\" \
         on \"from-test\" must be required by all successors, but isn't on \"plain-b\""
    );
}

#[test]
fn test_required_attribute_checked_against_every_predecessor() {
    let plan = PlanSpec::from_nodes_and_edges(
        vec![
            node("left", "from").with_output_attr(PhysicalAttr::parallel_run(2)),
            node("right", "from"),
            node("merge", "partitionMerge").with_required_attr(PhysicalAttr::parallel_run(2)),
        ],
        &[(0, 2), (1, 2)],
    )
    .unwrap();
    assert_eq!(
        validation_message(&plan),
        "invalid physical query plan; attribute \"parallel-run\" \
         required by \"merge\" is missing from predecessor \"right\""
    );
}

#[test]
fn test_merge_output_need_not_be_required() {
    let plan = chain(vec![
        node("from-test", "from").with_output_attr(PhysicalAttr::parallel_run(4)),
        merge(4),
        node("yield", "yield"),
    ]);
    assert!(validate_attributes(&plan).is_ok());
}

#[test]
fn test_plan_without_attributes_is_valid() {
    let plan = chain(vec![node("from", "from"), node("yield", "yield")]);
    assert!(validate_attributes(&plan).is_ok());
}

#[test]
fn test_zero_factor_is_rejected() {
    let plan = chain(vec![
        node("from-test", "from").with_output_attr(PhysicalAttr::parallel_run(0)),
        merge(0),
        node("yield", "yield"),
    ]);
    assert_eq!(
        validation_message(&plan),
        "invalid physical query plan; attribute \"parallel-run\" \
         on \"from-test\" must have a factor of at least 1"
    );
}
