//! The Transformation/Dataset execution substrate.
//!
//! Each running plan node is a [`Transformation`] (consumes tables from its
//! parents) bound to a [`Dataset`] (its output). Parents call directly into
//! their children, so a slow child blocks its parent's production call.
//!
//! ```text
//!   source ──▶ Dataset ──▶ Transformation ──▶ Dataset ──▶ Transformation ...
//!                  (push: process / retract / watermark / finish)
//! ```

mod cache;
mod dataset;
mod fan_in;
mod source;
mod transformation;

pub use cache::{AccumulationMode, CachedDataset, TableCache, Trigger};
pub use dataset::{Dataset, Downstream, PassthroughDataset};
pub use fan_in::{FanIn, FanInState, ParentState};
pub use source::Source;
pub use transformation::{DatasetId, Transformation};
