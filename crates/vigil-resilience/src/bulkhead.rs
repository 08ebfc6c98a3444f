//! Concurrency limiter for calls to a shared dependency

use crate::error::ResilienceError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caps the number of in-flight calls
#[derive(Debug, Clone)]
pub struct Bulkhead {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create bulkhead allowing `max_concurrent` calls (at least one)
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Configured limit
    #[inline]
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Free slots right now
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a slot, then run `operation`
    pub async fn execute<T, E, Fut>(&self, operation: Fut) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let Ok(_permit) = self.permits.acquire().await else {
            return Err(ResilienceError::BulkheadFull {
                max_concurrent: self.max_concurrent,
            });
        };
        operation.await.map_err(ResilienceError::Operation)
    }

    /// Run `operation` only if a slot is free right now
    pub async fn try_execute<T, E, Fut>(&self, operation: Fut) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let Ok(_permit) = self.permits.try_acquire() else {
            tracing::debug!(max_concurrent = self.max_concurrent, "bulkhead_rejected_call");
            return Err(ResilienceError::BulkheadFull {
                max_concurrent: self.max_concurrent,
            });
        };
        operation.await.map_err(ResilienceError::Operation)
    }
}
