//! Retry policy with exponential backoff and jitter

use crate::error::truncate_summary;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Smallest sleep allowed once jitter has been applied
pub const MIN_JITTERED_DELAY: Duration = Duration::from_millis(10);

/// Relative jitter applied to each delay (±20%)
const JITTER_RATIO: f64 = 0.2;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Double the delay for every attempt
    pub use_exponential_backoff: bool,
    /// Perturb delays by ±20%
    pub use_jitter: bool,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            use_exponential_backoff: true,
            use_jitter: true,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryOptions {
    /// Set total attempts (clamped to at least one)
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base delay
    #[inline]
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Toggle exponential backoff
    #[inline]
    #[must_use]
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Toggle jitter
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.use_jitter = enabled;
        self
    }
}

/// Retries an async operation according to [`RetryOptions`]
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    /// Create policy
    #[inline]
    #[must_use]
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    /// Policy configuration
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Delay slept after the failed attempt with 0-based index `attempt`
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.options.initial_delay.as_secs_f64();
        let raw = if self.options.use_exponential_backoff {
            base * 2f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX))
        } else {
            base
        };
        let capped = raw.min(self.options.max_delay.as_secs_f64());

        if !self.options.use_jitter {
            return Duration::from_secs_f64(capped);
        }

        let factor = rand::rng().random_range(-JITTER_RATIO..=JITTER_RATIO);
        let jittered = capped + capped * factor;
        Duration::from_secs_f64(jittered.max(MIN_JITTERED_DELAY.as_secs_f64()))
    }

    /// Run `operation` until it succeeds or attempts are exhausted.
    ///
    /// The error of the last attempt is returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(attempt = attempt + 1, "retry_succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let summary = truncate_summary(&err.to_string(), 200);
                    if attempt + 1 >= max_attempts {
                        tracing::warn!(
                            attempts = max_attempts,
                            error = %summary,
                            "retry_exhausted"
                        );
                        return Err(err);
                    }

                    let delay = self.calculate_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %summary,
                        "retry_scheduled"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
