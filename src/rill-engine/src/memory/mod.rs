//! Memory accounting for query execution.

mod allocator;

pub use allocator::{MemoryReservation, ResourceAllocator};
