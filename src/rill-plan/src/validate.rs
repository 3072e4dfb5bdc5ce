//! Attribute validation for physical plans.
//!
//! Runs before any operator is built. The walk is purely structural and
//! reports the first violation found in topological order.

use common_error::{RillError, RillResult};
use log::{debug, warn};

use crate::spec::PlanSpec;

/// Check that required and output attributes agree across every edge.
///
/// For each node, in topological order:
///
/// 1. every attribute it outputs or requires must carry a factor of at
///    least one;
/// 2. every attribute it requires must be output, with an equal value, by
///    each direct predecessor;
/// 3. every output attribute that successors must require (see
///    [`PhysicalAttr::successors_must_require`]) must be required by each
///    direct successor.
///
/// [`PhysicalAttr::successors_must_require`]: crate::PhysicalAttr::successors_must_require
pub fn validate_attributes(plan: &PlanSpec) -> RillResult<()> {
    let result = check(plan);
    match &result {
        Ok(()) => debug!("physical plan attributes validated ({} nodes)", plan.len()),
        Err(e) => warn!("rejecting physical plan: {e}"),
    }
    result
}

fn check(plan: &PlanSpec) -> RillResult<()> {
    for node in plan.topological_order() {
        let attrs = node.output_attrs().iter().chain(node.required_attrs());
        for (key, attr) in attrs {
            if attr.factor() == 0 {
                return Err(RillError::invalid_plan(format!(
                    "attribute {:?} on {:?} must have a factor of at least 1",
                    key,
                    node.id().as_str()
                )));
            }
        }

        for (key, required) in node.required_attrs() {
            for pred in plan.predecessors(node.id()) {
                match pred.output_attr(key) {
                    None => {
                        return Err(RillError::invalid_plan(format!(
                            "attribute {:?} required by {:?} is missing from predecessor {:?}",
                            key,
                            node.id().as_str(),
                            pred.id().as_str()
                        )));
                    }
                    Some(output) if !required.satisfied_by(output) => {
                        return Err(RillError::invalid_plan(format!(
                            "attribute {:?} required by {:?} does not match attribute in predecessor {:?}",
                            key,
                            node.id().as_str(),
                            pred.id().as_str()
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        for (key, output) in node.output_attrs() {
            if !output.successors_must_require() {
                continue;
            }
            for succ in plan.successors(node.id()) {
                if succ.required_attr(key).is_none() {
                    return Err(RillError::invalid_plan(format!(
                        "attribute {:?} on {:?} must be required by all successors, but isn't on {:?}",
                        key,
                        node.id().as_str(),
                        succ.id().as_str()
                    )));
                }
            }
        }
    }
    Ok(())
}
