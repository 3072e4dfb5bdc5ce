//! Error types and result aliases for Rill.
//!
//! Every crate in the workspace reports failures through [`RillError`]. The
//! variants mirror the execution core's error taxonomy: plan validation,
//! resource exhaustion, propagated upstream failures, cancellation and the
//! post-execution leak diagnostic.

mod error;

pub use error::{RillError, RillResult};
