//! EXPLAIN rendering for physical plans.

use common_display::{DisplayTree, TreeNode};

use crate::node::PhysicalPlanNode;
use crate::spec::PlanSpec;

struct PlanTreeNode<'a> {
    plan: &'a PlanSpec,
    node: &'a PhysicalPlanNode,
}

impl TreeNode for PlanTreeNode<'_> {
    fn label(&self) -> String {
        format!("{} [{}]", self.node.id(), self.node.kind())
    }

    fn children(&self) -> Vec<Box<dyn TreeNode + '_>> {
        self.plan
            .predecessors(self.node.id())
            .into_iter()
            .map(|node| {
                Box::new(PlanTreeNode {
                    plan: self.plan,
                    node,
                }) as Box<dyn TreeNode + '_>
            })
            .collect()
    }

    fn details(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(desc) = self.node.spec().describe() {
            parts.push(desc);
        }
        for attr in self.node.required_attrs().values() {
            parts.push(format!("requires {attr}"));
        }
        for attr in self.node.output_attrs().values() {
            parts.push(format!("outputs {attr}"));
        }
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

impl PlanSpec {
    /// Render the plan as a tree per sink, predecessors as children.
    pub fn explain(&self) -> String {
        let roots = self
            .sinks()
            .into_iter()
            .map(|node| Box::new(PlanTreeNode { plan: self, node }) as Box<dyn TreeNode + '_>)
            .collect();
        DisplayTree::forest(roots).to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Arc;

    use crate::attributes::PhysicalAttr;
    use crate::node::{PhysicalPlanNode, ProcedureKind, ProcedureSpec};
    use crate::spec::PlanSpec;

    #[derive(Debug)]
    struct KindSpec(&'static str);

    impl ProcedureSpec for KindSpec {
        fn kind(&self) -> ProcedureKind {
            ProcedureKind::new(self.0)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_explain() {
        let plan = PlanSpec::from_nodes_and_edges(
            vec![
                PhysicalPlanNode::new("from", Arc::new(KindSpec("from")))
                    .with_output_attr(PhysicalAttr::parallel_run(2)),
                PhysicalPlanNode::new("merge", Arc::new(KindSpec("partitionMerge")))
                    .with_required_attr(PhysicalAttr::parallel_run(2)),
            ],
            &[(0, 1)],
        )
        .unwrap();

        assert_eq!(
            plan.explain(),
            "merge [partitionMerge] (requires parallel-run(factor=2))\n\
             └─ from [from] (outputs parallel-run(factor=2))\n"
        );
    }
}
