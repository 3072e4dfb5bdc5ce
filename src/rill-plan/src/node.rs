//! Physical plan nodes and procedure specifications.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attributes::PhysicalAttr;

/// Identifier of a node in the physical plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of operator a procedure spec describes. Used as the registry key
/// when the executor looks up a constructor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcedureKind(String);

impl ProcedureKind {
    /// Create a procedure kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Get the kind as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcedureKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Operator kind plus parameters for one plan node.
///
/// Concrete specs live next to the operators that execute them; the plan
/// only needs the kind and a way to hand the spec back to a constructor.
pub trait ProcedureSpec: fmt::Debug + Send + Sync {
    /// The operator kind this spec configures.
    fn kind(&self) -> ProcedureKind;

    /// Downcasting hook for operator constructors.
    fn as_any(&self) -> &dyn Any;

    /// Short parameter summary for EXPLAIN.
    fn describe(&self) -> Option<String> {
        None
    }
}

/// A node of the physical plan DAG.
///
/// Attributes are assigned while planning. Once the node is added to a
/// [`PlanSpec`](crate::PlanSpec) it is only read.
#[derive(Debug, Clone)]
pub struct PhysicalPlanNode {
    id: NodeId,
    spec: Arc<dyn ProcedureSpec>,
    output_attrs: BTreeMap<String, PhysicalAttr>,
    required_attrs: BTreeMap<String, PhysicalAttr>,
}

impl PhysicalPlanNode {
    /// Create a node without attributes.
    pub fn new(id: impl Into<NodeId>, spec: Arc<dyn ProcedureSpec>) -> Self {
        Self {
            id: id.into(),
            spec,
            output_attrs: BTreeMap::new(),
            required_attrs: BTreeMap::new(),
        }
    }

    /// Declare a property this node guarantees about its output.
    pub fn set_output_attr(&mut self, attr: PhysicalAttr) {
        self.output_attrs.insert(attr.key().to_string(), attr);
    }

    /// Declare a property this node demands of its input.
    pub fn set_required_attr(&mut self, attr: PhysicalAttr) {
        self.required_attrs.insert(attr.key().to_string(), attr);
    }

    /// Builder form of [`set_output_attr`](Self::set_output_attr).
    pub fn with_output_attr(mut self, attr: PhysicalAttr) -> Self {
        self.set_output_attr(attr);
        self
    }

    /// Builder form of [`set_required_attr`](Self::set_required_attr).
    pub fn with_required_attr(mut self, attr: PhysicalAttr) -> Self {
        self.set_required_attr(attr);
        self
    }

    /// Node id.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Procedure spec.
    pub fn spec(&self) -> &Arc<dyn ProcedureSpec> {
        &self.spec
    }

    /// Operator kind.
    pub fn kind(&self) -> ProcedureKind {
        self.spec.kind()
    }

    /// Output attributes keyed by attribute key.
    pub fn output_attrs(&self) -> &BTreeMap<String, PhysicalAttr> {
        &self.output_attrs
    }

    /// Required attributes keyed by attribute key.
    pub fn required_attrs(&self) -> &BTreeMap<String, PhysicalAttr> {
        &self.required_attrs
    }

    /// Look up an output attribute.
    pub fn output_attr(&self, key: &str) -> Option<&PhysicalAttr> {
        self.output_attrs.get(key)
    }

    /// Look up a required attribute.
    pub fn required_attr(&self, key: &str) -> Option<&PhysicalAttr> {
        self.required_attrs.get(key)
    }
}
