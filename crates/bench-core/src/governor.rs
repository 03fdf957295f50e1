//! Concurrency governor
//!
//! Bounds the number of simultaneously in-flight dispatches. Requests beyond
//! the limit wait for a slot; they are never rejected.

use crate::{BenchError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Counting gate around request execution
#[derive(Debug, Clone)]
pub struct ConcurrencyGovernor {
    limit: Option<usize>,
    semaphore: Option<Arc<Semaphore>>,
}

impl ConcurrencyGovernor {
    /// `None` means unlimited; a limit of zero is a configuration error
    pub fn new(limit: Option<usize>) -> Result<Self> {
        match limit {
            Some(0) => Err(BenchError::config("max_concurrency must be a positive integer")),
            Some(n) => Ok(Self {
                limit,
                semaphore: Some(Arc::new(Semaphore::new(n))),
            }),
            None => Ok(Self::unlimited()),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            limit: None,
            semaphore: None,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Slots currently free; `None` when unlimited
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Run `fut` once a slot is free.
    ///
    /// The slot is held for the whole execution and released when the future
    /// completes, fails, panics or is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        let _permit = match &self.semaphore {
            // The semaphore is never closed, so acquire only fails after close()
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        fut.await
    }
}
