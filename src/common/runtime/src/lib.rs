//! Async runtime utilities for Rill.
//!
//! The executor runs one tokio task per source worker and collects them
//! through [`JoinSet`], which reports panicked tasks as errors.

use std::future::Future;

use common_error::{RillError, RillResult};

/// A handle to a set of spawned worker tasks.
#[derive(Debug)]
pub struct JoinSet<T> {
    inner: tokio::task::JoinSet<T>,
}

impl<T: Send + 'static> JoinSet<T> {
    /// Create a new join set.
    pub fn new() -> Self {
        Self {
            inner: tokio::task::JoinSet::new(),
        }
    }

    /// Spawn a task into the set.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.inner.spawn(future);
    }

    /// Wait for the next task to complete.
    ///
    /// A panicked or aborted task is reported as an `InternalError`.
    pub async fn join_next(&mut self) -> Option<RillResult<T>> {
        self.inner.join_next().await.map(|res| {
            res.map_err(|e| RillError::internal(format!("worker task failed: {e}")))
        })
    }

    /// Wait for every task, returning their outputs in completion order.
    pub async fn join_all(&mut self) -> Vec<RillResult<T>> {
        let mut out = Vec::with_capacity(self.inner.len());
        while let Some(res) = self.join_next().await {
            out.push(res);
        }
        out
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get the number of tasks in the set.
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<T: Send + 'static> Default for JoinSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_all() {
        let mut set = JoinSet::new();
        for i in 0..4 {
            set.spawn(async move { i * 2 });
        }
        assert_eq!(set.len(), 4);

        let mut results: Vec<i32> = set
            .join_all()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 2, 4, 6]);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_panic_reports_error() {
        let mut set: JoinSet<()> = JoinSet::new();
        set.spawn(async { panic!("worker exploded") });
        let res = set.join_next().await.unwrap();
        assert!(matches!(res, Err(RillError::InternalError(_))));
    }
}
