//! Sliding-window circuit breaker
//!
//! The breaker keeps a window of timestamped call outcomes. It opens once
//! the window holds at least `minimum_throughput` events and the failure
//! ratio reaches `failure_threshold`. After `break_duration` the next call
//! is let through as a single trial (HALF_OPEN): success closes the
//! breaker and clears the window, failure reopens it.

use crate::error::ResilienceError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// One trial call is allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerOptions {
    /// Failure ratio (0.0..=1.0) that opens the breaker
    pub failure_threshold: f64,
    /// Length of the sliding window
    pub sampling_duration: Duration,
    /// Events required in the window before the ratio is evaluated
    pub minimum_throughput: usize,
    /// Time spent OPEN before a trial call is allowed
    pub break_duration: Duration,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 0.7,
            sampling_duration: Duration::from_secs(30),
            minimum_throughput: 3,
            break_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    at: Instant,
    success: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
    window: VecDeque<CallRecord>,
}

impl BreakerState {
    fn prune(&mut self, now: Instant, sampling: Duration) {
        while let Some(front) = self.window.front() {
            if now.saturating_duration_since(front.at) > sampling {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_started = None;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.trial_started = None;
        self.window.clear();
    }
}

enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker guarding one external dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    options: CircuitBreakerOptions,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create breaker for the named dependency
    #[must_use]
    pub fn new(name: impl Into<String>, options: CircuitBreakerOptions) -> Self {
        Self {
            name: name.into(),
            options,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                trial_started: None,
                window: VecDeque::new(),
            }),
        }
    }

    /// Name of the protected dependency
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    #[inline]
    #[must_use]
    pub fn options(&self) -> &CircuitBreakerOptions {
        &self.options
    }

    /// Current state (transitions out of OPEN only happen on the next call)
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failures currently inside the window
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.inner.lock().window.iter().filter(|r| !r.success).count()
    }

    /// Successes currently inside the window
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.inner.lock().window.iter().filter(|r| r.success).count()
    }

    /// Force the breaker OPEN
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        inner.open(Instant::now());
        tracing::warn!(breaker = %self.name, "circuit_tripped_manually");
    }

    /// Force the breaker CLOSED and forget history
    pub fn reset(&self) {
        self.inner.lock().close();
        tracing::info!(breaker = %self.name, "circuit_reset");
    }

    fn admit(&self) -> Result<Admission, Duration> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.options.break_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started = Some(now);
                    tracing::info!(breaker = %self.name, "circuit_half_open");
                    Ok(Admission::Trial)
                } else {
                    Err(self.options.break_duration - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                // Another caller owns the trial; a trial abandoned for longer
                // than break_duration is replaced
                match inner.trial_started {
                    Some(started)
                        if now.saturating_duration_since(started) < self.options.break_duration =>
                    {
                        Err(self.options.break_duration - now.saturating_duration_since(started))
                    }
                    _ => {
                        inner.trial_started = Some(now);
                        Ok(Admission::Trial)
                    }
                }
            }
        }
    }

    fn record(&self, admission: &Admission, success: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if matches!(admission, Admission::Trial) {
            if success {
                inner.close();
                tracing::info!(breaker = %self.name, "circuit_closed");
            } else {
                inner.window.push_back(CallRecord { at: now, success });
                inner.open(now);
                tracing::warn!(breaker = %self.name, "circuit_reopened");
            }
            return;
        }

        inner.window.push_back(CallRecord { at: now, success });
        inner.prune(now, self.options.sampling_duration);

        if inner.state != CircuitState::Closed {
            return;
        }

        let total = inner.window.len();
        if total < self.options.minimum_throughput {
            return;
        }
        let failures = inner.window.iter().filter(|r| !r.success).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = failures as f64 / total as f64;
        if ratio >= self.options.failure_threshold {
            inner.open(now);
            tracing::warn!(
                breaker = %self.name,
                failures,
                total,
                ratio,
                "circuit_opened"
            );
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejected calls never invoke the operation and are not recorded.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = match self.admit() {
            Ok(admission) => admission,
            Err(retry_after) => {
                tracing::debug!(breaker = %self.name, "circuit_rejected_call");
                return Err(ResilienceError::CircuitOpen { retry_after });
            }
        };

        match operation().await {
            Ok(value) => {
                self.record(&admission, true);
                Ok(value)
            }
            Err(err) => {
                self.record(&admission, false);
                Err(ResilienceError::Operation(err))
            }
        }
    }

    /// Run an already guarded call (e.g. one wrapped in a timeout), recording
    /// every error it produces as a failure
    pub(crate) async fn execute_guarded<T, E, F, Fut>(
        &self,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let admission = match self.admit() {
            Ok(admission) => admission,
            Err(retry_after) => return Err(ResilienceError::CircuitOpen { retry_after }),
        };

        let outcome = operation().await;
        self.record(&admission, outcome.is_ok());
        outcome
    }
}
