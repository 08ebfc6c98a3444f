//! Retry + circuit breaker composition
//!
//! Order is fixed: the breaker wraps the raw operation, the retry policy
//! wraps the breaker-guarded call. A rejected attempt still counts towards
//! `max_attempts`.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerOptions};
use crate::error::ResilienceError;
use crate::retry::{RetryOptions, RetryPolicy};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Guarded execution of unreliable async calls
#[derive(Debug, Clone, Default)]
pub struct ResiliencePipeline {
    retry: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    attempt_timeout: Option<Duration>,
}

impl ResiliencePipeline {
    /// Pipeline with retries only
    #[inline]
    #[must_use]
    pub fn new(retry: RetryOptions) -> Self {
        Self {
            retry: RetryPolicy::new(retry),
            breaker: None,
            attempt_timeout: None,
        }
    }

    /// Pipeline with retries and a dedicated breaker
    #[must_use]
    pub fn with_circuit_breaker(
        retry: RetryOptions,
        name: impl Into<String>,
        breaker: CircuitBreakerOptions,
    ) -> Self {
        Self::new(retry).with_breaker(Arc::new(CircuitBreaker::new(name, breaker)))
    }

    /// Attach an existing breaker (one breaker per provider may be shared)
    #[inline]
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Bound every individual attempt
    #[inline]
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// The breaker, if configured
    #[inline]
    #[must_use]
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// The retry policy
    #[inline]
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execute `operation` under the configured guards
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.retry
            .execute(|| {
                let attempt = operation();
                self.guard(attempt)
            })
            .await
    }

    async fn guard<T, E, Fut>(&self, attempt: Fut) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let limit = self.attempt_timeout;
        let timed = move || async move {
            match limit {
                Some(after) => match tokio::time::timeout(after, attempt).await {
                    Ok(result) => result.map_err(ResilienceError::Operation),
                    Err(_) => Err(ResilienceError::Timeout { after }),
                },
                None => attempt.await.map_err(ResilienceError::Operation),
            }
        };

        match &self.breaker {
            Some(breaker) => breaker.execute_guarded(timed).await,
            None => timed().await,
        }
    }
}

/// Run a future with a deadline
pub async fn with_timeout<T, E, Fut>(after: Duration, future: Fut) -> Result<T, ResilienceError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(after, future).await {
        Ok(result) => result.map_err(ResilienceError::Operation),
        Err(_) => Err(ResilienceError::Timeout { after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryOptions {
        RetryOptions::default().with_jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_only_returns_original_error() {
        let pipeline = ResiliencePipeline::new(no_jitter());
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = pipeline
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let inner = err.into_operation().unwrap();
        assert_eq!(inner.kind(), std::io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_rejections_count_as_attempts() {
        let pipeline = ResiliencePipeline::with_circuit_breaker(
            no_jitter().with_max_attempts(5),
            "llm",
            CircuitBreakerOptions::default(),
        );
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = pipeline
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("provider down")
            })
            .await
            .unwrap_err();

        // three real failures open the breaker, the remaining attempts fail fast
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.is_circuit_open());
        assert_eq!(
            pipeline.breaker().map(|b| b.state()),
            Some(CircuitState::Open)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let pipeline = ResiliencePipeline::new(no_jitter().with_max_attempts(2))
            .with_attempt_timeout(Duration::from_millis(100));
        let err = pipeline
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_through() {
        let pipeline = ResiliencePipeline::default();
        let value = pipeline.execute(|| async { Ok::<_, String>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_helper() {
        let ok = with_timeout(Duration::from_secs(1), async { Ok::<_, String>(1) }).await;
        assert_eq!(ok.unwrap(), 1);
        let late = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, String>(1)
        })
        .await;
        assert!(late.unwrap_err().is_timeout());
    }
}
