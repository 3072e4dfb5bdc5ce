//! The physical plan: nodes, edges and query-level settings.

use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

use common_config::ResourceManagement;
use common_error::{RillError, RillResult};

use crate::attributes::PARALLEL_RUN_KEY;
use crate::node::{NodeId, PhysicalPlanNode};

/// A validated-shape physical plan ready for execution.
///
/// Nodes are stored in insertion order. Edges are held as adjacency lists in
/// declaration order, and a topological order is computed once at build time
/// so every walk over the plan is deterministic.
#[derive(Debug, Clone)]
pub struct PlanSpec {
    nodes: Vec<PhysicalPlanNode>,
    index: HashMap<NodeId, usize>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    order: Vec<usize>,
    resources: ResourceManagement,
    now: SystemTime,
}

impl PlanSpec {
    /// Build a plan from nodes and index-pair edges `(predecessor, successor)`.
    pub fn from_nodes_and_edges(
        nodes: Vec<PhysicalPlanNode>,
        edges: &[(usize, usize)],
    ) -> RillResult<Self> {
        let mut builder = PlanSpecBuilder::new();
        for node in nodes {
            builder = builder.node(node);
        }
        for &(from, to) in edges {
            builder = builder.edge(from, to);
        }
        builder.build()
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[PhysicalPlanNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the plan has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&PhysicalPlanNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Direct predecessors of a node, in edge declaration order.
    pub fn predecessors(&self, id: &NodeId) -> Vec<&PhysicalPlanNode> {
        self.neighbours(id, &self.predecessors)
    }

    /// Direct successors of a node, in edge declaration order.
    pub fn successors(&self, id: &NodeId) -> Vec<&PhysicalPlanNode> {
        self.neighbours(id, &self.successors)
    }

    fn neighbours<'a>(&'a self, id: &NodeId, adj: &[Vec<usize>]) -> Vec<&'a PhysicalPlanNode> {
        self.index
            .get(id)
            .map(|&i| adj[i].iter().map(|&j| &self.nodes[j]).collect())
            .unwrap_or_default()
    }

    /// Nodes without predecessors (sources).
    pub fn roots(&self) -> Vec<&PhysicalPlanNode> {
        self.order
            .iter()
            .filter(|&&i| self.predecessors[i].is_empty())
            .map(|&i| &self.nodes[i])
            .collect()
    }

    /// Nodes without successors (sinks).
    pub fn sinks(&self) -> Vec<&PhysicalPlanNode> {
        self.order
            .iter()
            .filter(|&&i| self.successors[i].is_empty())
            .map(|&i| &self.nodes[i])
            .collect()
    }

    /// Nodes ordered so every predecessor precedes its successors.
    pub fn topological_order(&self) -> impl Iterator<Item = &PhysicalPlanNode> {
        self.order.iter().map(move |&i| &self.nodes[i])
    }

    /// Parallel-run factor declared on a node's output, `1` if none.
    pub fn parallel_factor(&self, id: &NodeId) -> usize {
        self.node(id)
            .and_then(|n| n.output_attr(PARALLEL_RUN_KEY))
            .map_or(1, |attr| attr.factor())
    }

    /// Query-level resource quotas.
    pub fn resources(&self) -> &ResourceManagement {
        &self.resources
    }

    /// Reference "now" for time-bounded operators.
    pub fn now(&self) -> SystemTime {
        self.now
    }

    /// Replace the resource quotas.
    pub fn with_resources(mut self, resources: ResourceManagement) -> Self {
        self.resources = resources;
        self
    }

    /// Replace the reference clock value.
    pub fn with_now(mut self, now: SystemTime) -> Self {
        self.now = now;
        self
    }
}

/// Incremental builder for [`PlanSpec`].
#[derive(Debug, Default)]
pub struct PlanSpecBuilder {
    nodes: Vec<PhysicalPlanNode>,
    edges: Vec<(usize, usize)>,
    resources: ResourceManagement,
    now: Option<SystemTime>,
}

impl PlanSpecBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Its index is the number of nodes added before it.
    pub fn node(mut self, node: PhysicalPlanNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add an edge between two node indexes.
    pub fn edge(mut self, from: usize, to: usize) -> Self {
        self.edges.push((from, to));
        self
    }

    /// Set resource quotas.
    pub fn resources(mut self, resources: ResourceManagement) -> Self {
        self.resources = resources;
        self
    }

    /// Set the reference clock value.
    pub fn now(mut self, now: SystemTime) -> Self {
        self.now = Some(now);
        self
    }

    /// Build the plan, rejecting malformed graphs.
    pub fn build(self) -> RillResult<PlanSpec> {
        let n = self.nodes.len();
        if n == 0 {
            return Err(RillError::invalid_plan("plan has no nodes"));
        }

        let mut index = HashMap::with_capacity(n);
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.id().clone(), i).is_some() {
                return Err(RillError::invalid_plan(format!(
                    "duplicate node id {:?}",
                    node.id().as_str()
                )));
            }
        }

        let mut predecessors = vec![Vec::new(); n];
        let mut successors = vec![Vec::new(); n];
        for &(from, to) in &self.edges {
            if from >= n || to >= n {
                return Err(RillError::invalid_plan(format!(
                    "edge ({from}, {to}) references a node outside 0..{n}"
                )));
            }
            if from == to {
                return Err(RillError::invalid_plan(format!(
                    "node {:?} cannot be its own predecessor",
                    self.nodes[from].id().as_str()
                )));
            }
            if successors[from].contains(&to) {
                continue;
            }
            successors[from].push(to);
            predecessors[to].push(from);
        }

        let order = topological_sort(&predecessors, &successors).ok_or_else(|| {
            RillError::invalid_plan("plan contains a cycle")
        })?;

        Ok(PlanSpec {
            nodes: self.nodes,
            index,
            predecessors,
            successors,
            order,
            resources: self.resources,
            now: self.now.unwrap_or_else(SystemTime::now),
        })
    }
}

/// Kahn's algorithm, seeded in insertion order. Returns `None` on a cycle.
fn topological_sort(predecessors: &[Vec<usize>], successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &succ in &successors[i] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push_back(succ);
            }
        }
    }

    (order.len() == in_degree.len()).then_some(order)
}
