//! Quota-enforcing memory accounting shared by every operator of one query.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::error;

use common_config::ResourceManagement;
use common_error::{RillError, RillResult};

/// Per-query memory accounting.
///
/// Every allocate/free is a single atomic operation on one counter, so calls
/// from concurrently running operators are linearizable. The allocator only
/// accounts; buffers themselves are owned by arrow.
#[derive(Debug)]
pub struct ResourceAllocator {
    /// Bytes currently allocated.
    allocated: AtomicUsize,
    /// High-water mark of `allocated`.
    max_allocated: AtomicUsize,
    /// Quota in bytes, `None` when unlimited.
    limit: Option<usize>,
    /// Frees that did not match an allocation.
    tracking_errors: AtomicU64,
}

impl ResourceAllocator {
    /// Create an allocator with an optional byte quota.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            max_allocated: AtomicUsize::new(0),
            limit,
            tracking_errors: AtomicU64::new(0),
        }
    }

    /// Create an allocator that only accounts.
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Create an allocator bound to a query's memory quota.
    pub fn from_resources(resources: &ResourceManagement) -> Self {
        Self::new(resources.memory_limit())
    }

    /// Account `bytes` against the quota.
    ///
    /// Fails without changing the counter if the allocation would cross the
    /// quota. A failed allocation is fatal to the query and is not retried.
    pub fn allocate(&self, bytes: usize) -> RillResult<()> {
        if bytes == 0 {
            return Ok(());
        }

        let mut current = self.allocated.load(Ordering::Relaxed);
        loop {
            let new = current.saturating_add(bytes);
            if let Some(limit) = self.limit {
                if new > limit {
                    return Err(RillError::resource_exhausted(format!(
                        "memory quota exceeded: {current} + {bytes} > {limit} bytes"
                    )));
                }
            }

            match self.allocated.compare_exchange_weak(
                current,
                new,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.max_allocated.fetch_max(new, Ordering::Relaxed);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Return `bytes` to the allocator.
    ///
    /// Freeing more than is allocated clamps the counter at zero and records a
    /// tracking error, reported by [`check_leaks`](Self::check_leaks).
    pub fn free(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }

        let mut current = self.allocated.load(Ordering::Relaxed);
        loop {
            let new = current.saturating_sub(bytes);
            match self.allocated.compare_exchange_weak(
                current,
                new,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if bytes > current {
            self.tracking_errors.fetch_add(1, Ordering::Relaxed);
            error!("freed {bytes} bytes with only {current} bytes allocated");
        }
    }

    /// Bytes currently allocated.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Highest number of bytes allocated at once.
    pub fn max_allocated(&self) -> usize {
        self.max_allocated.load(Ordering::Relaxed)
    }

    /// The byte quota, `None` when unlimited.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Bytes that can still be allocated.
    pub fn available(&self) -> usize {
        self.limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(self.allocated()))
    }

    /// Check whether an allocation would succeed without making it.
    pub fn can_allocate(&self, bytes: usize) -> bool {
        bytes <= self.available()
    }

    /// Number of frees that did not match an allocation.
    pub fn tracking_errors(&self) -> u64 {
        self.tracking_errors.load(Ordering::Relaxed)
    }

    /// Teardown diagnostic: every allocated byte has been freed and no
    /// tracking error was recorded.
    pub fn check_leaks(&self) -> RillResult<()> {
        let allocated = self.allocated();
        let tracking_errors = self.tracking_errors();
        if allocated != 0 || tracking_errors != 0 {
            return Err(RillError::memory_leak(format!(
                "{allocated} bytes still allocated, {tracking_errors} tracking errors"
            )));
        }
        Ok(())
    }
}

impl Default for ResourceAllocator {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// RAII guard for bytes held against a [`ResourceAllocator`].
///
/// Releases its bytes when dropped.
pub struct MemoryReservation {
    allocator: Arc<ResourceAllocator>,
    bytes: usize,
}

impl MemoryReservation {
    /// Reserve `bytes`, failing if the quota would be exceeded.
    pub fn try_new(allocator: Arc<ResourceAllocator>, bytes: usize) -> RillResult<Self> {
        allocator.allocate(bytes)?;
        Ok(Self { allocator, bytes })
    }

    /// A reservation holding nothing yet.
    pub fn empty(allocator: Arc<ResourceAllocator>) -> Self {
        Self {
            allocator,
            bytes: 0,
        }
    }

    /// The allocator this reservation is held against.
    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }

    /// Reserved bytes.
    pub fn size(&self) -> usize {
        self.bytes
    }

    /// Grow the reservation.
    pub fn grow(&mut self, additional: usize) -> RillResult<()> {
        self.allocator.allocate(additional)?;
        self.bytes += additional;
        Ok(())
    }

    /// Shrink the reservation by up to `amount` bytes.
    pub fn shrink(&mut self, amount: usize) {
        let release = amount.min(self.bytes);
        self.allocator.free(release);
        self.bytes -= release;
    }

    /// Release everything now.
    pub fn free(mut self) {
        self.shrink(self.bytes);
    }
}

impl fmt::Debug for MemoryReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryReservation")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.allocator.free(self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quota_enforced() {
        let allocator = ResourceAllocator::new(Some(1000));

        allocator.allocate(500).unwrap();
        allocator.allocate(400).unwrap();
        assert_eq!(allocator.allocated(), 900);

        let err = allocator.allocate(200).unwrap_err();
        assert!(err.is_resource_exhausted());
        assert_eq!(allocator.allocated(), 900);

        allocator.allocate(100).unwrap();
        assert_eq!(allocator.available(), 0);

        allocator.free(1000);
        assert_eq!(allocator.allocated(), 0);
        assert_eq!(allocator.max_allocated(), 1000);
        assert!(allocator.check_leaks().is_ok());
    }

    #[test]
    fn test_unlimited() {
        let allocator = ResourceAllocator::from_resources(&ResourceManagement::default());
        assert_eq!(allocator.limit(), None);
        allocator.allocate(usize::MAX / 2).unwrap();
        assert!(allocator.can_allocate(1));
    }

    #[test]
    fn test_leak_detected() {
        let allocator = ResourceAllocator::unlimited();
        allocator.allocate(64).unwrap();
        let err = allocator.check_leaks().unwrap_err();
        assert!(matches!(err, RillError::MemoryLeak(_)));
    }

    #[test]
    fn test_over_free_is_tracking_error() {
        let allocator = ResourceAllocator::unlimited();
        allocator.allocate(10).unwrap();
        allocator.free(20);
        assert_eq!(allocator.allocated(), 0);
        assert_eq!(allocator.tracking_errors(), 1);
        assert!(matches!(
            allocator.check_leaks(),
            Err(RillError::MemoryLeak(_))
        ));
    }

    #[test]
    fn test_reservation_lifecycle() {
        let allocator = Arc::new(ResourceAllocator::new(Some(1000)));
        {
            let mut reservation = MemoryReservation::try_new(Arc::clone(&allocator), 500).unwrap();
            reservation.grow(200).unwrap();
            assert_eq!(allocator.allocated(), 700);
            assert!(reservation.grow(400).is_err());
            reservation.shrink(100);
            assert_eq!(reservation.size(), 600);
        }
        assert_eq!(allocator.allocated(), 0);
        assert!(allocator.check_leaks().is_ok());
    }

    proptest! {
        #[test]
        fn prop_fails_exactly_at_quota_crossing(
            quota in 1usize..10_000,
            sizes in proptest::collection::vec(1usize..2_000, 1..40),
        ) {
            let allocator = ResourceAllocator::new(Some(quota));
            let mut total = 0usize;
            for size in sizes {
                let result = allocator.allocate(size);
                if total + size > quota {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(allocator.allocated(), total);
                    break;
                }
                prop_assert!(result.is_ok());
                total += size;
                prop_assert_eq!(allocator.allocated(), total);
            }
        }
    }
}
