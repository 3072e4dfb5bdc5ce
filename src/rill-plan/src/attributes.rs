//! Physical attributes attached to plan nodes.
//!
//! A node lists the attributes it guarantees about its output and the ones
//! it requires of its input. The validator checks both sides of every edge
//! agree before anything runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Key of the parallel-run attribute.
pub const PARALLEL_RUN_KEY: &str = "parallel-run";

/// Key of the parallel-merge attribute.
pub const PARALLEL_MERGE_KEY: &str = "parallel-merge";

/// A property of a node's output or input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalAttr {
    /// Output is split into `factor` independent partitions.
    ParallelRun {
        /// Number of partitions.
        factor: usize,
    },
    /// `factor` partitions have been recombined into one stream.
    ParallelMerge {
        /// Number of partitions that were merged.
        factor: usize,
    },
}

impl PhysicalAttr {
    /// Create a parallel-run attribute.
    pub const fn parallel_run(factor: usize) -> Self {
        Self::ParallelRun { factor }
    }

    /// Create a parallel-merge attribute.
    pub const fn parallel_merge(factor: usize) -> Self {
        Self::ParallelMerge { factor }
    }

    /// Stable key identifying the attribute, independent of its value.
    pub const fn key(&self) -> &'static str {
        match self {
            Self::ParallelRun { .. } => PARALLEL_RUN_KEY,
            Self::ParallelMerge { .. } => PARALLEL_MERGE_KEY,
        }
    }

    /// Partition factor carried by the attribute.
    pub const fn factor(&self) -> usize {
        match self {
            Self::ParallelRun { factor } | Self::ParallelMerge { factor } => *factor,
        }
    }

    /// Whether every successor of a node emitting this attribute must
    /// require it. Holds for parallel runs only.
    pub const fn successors_must_require(&self) -> bool {
        matches!(self, Self::ParallelRun { .. })
    }

    /// Whether the attribute on a predecessor's output satisfies this
    /// required attribute.
    pub fn satisfied_by(&self, output: &Self) -> bool {
        self == output
    }
}

impl fmt::Display for PhysicalAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(factor={})", self.key(), self.factor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(PhysicalAttr::parallel_run(2).key(), PARALLEL_RUN_KEY);
        assert_eq!(PhysicalAttr::parallel_merge(2).key(), PARALLEL_MERGE_KEY);
    }

    #[test]
    fn test_satisfied_by() {
        let required = PhysicalAttr::parallel_run(2);
        assert!(required.satisfied_by(&PhysicalAttr::parallel_run(2)));
        assert!(!required.satisfied_by(&PhysicalAttr::parallel_run(1)));
        assert!(!required.satisfied_by(&PhysicalAttr::parallel_merge(2)));
    }

    #[test]
    fn test_successors_must_require() {
        assert!(PhysicalAttr::parallel_run(2).successors_must_require());
        assert!(!PhysicalAttr::parallel_merge(2).successors_must_require());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            PhysicalAttr::parallel_merge(4).to_string(),
            "parallel-merge(factor=4)"
        );
    }
}
