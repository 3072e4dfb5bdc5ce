//! Display utilities for Rill.
//!
//! Provides tree rendering for physical plans.

mod tree;

pub use tree::{DisplayTree, TreeNode};
