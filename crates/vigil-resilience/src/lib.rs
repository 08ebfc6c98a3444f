//! Vigil Resilience - guards for unreliable async calls
//!
//! Provides:
//! - [`RetryPolicy`]: bounded retries with exponential backoff and jitter
//! - [`CircuitBreaker`]: sliding-window failure-ratio breaker
//! - [`ResiliencePipeline`]: breaker wrapped by retry, optional per-attempt timeout
//! - [`Bulkhead`]: concurrency cap for a shared dependency
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil_resilience::{CircuitBreakerOptions, ResiliencePipeline, RetryOptions};
//!
//! # async fn example() {
//! let pipeline = ResiliencePipeline::with_circuit_breaker(
//!     RetryOptions::default(),
//!     "llm-provider",
//!     CircuitBreakerOptions::default(),
//! );
//! let answer = pipeline.execute(|| async { Ok::<_, String>("pong") }).await;
//! assert!(answer.is_ok());
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod bulkhead;
pub mod circuit_breaker;
pub mod error;
pub mod pipeline;
pub mod retry;

pub use bulkhead::Bulkhead;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerOptions, CircuitState};
pub use error::ResilienceError;
pub use pipeline::{with_timeout, ResiliencePipeline};
pub use retry::{RetryOptions, RetryPolicy, MIN_JITTERED_DELAY};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        Bulkhead, CircuitBreaker, CircuitBreakerOptions, CircuitState, ResilienceError,
        ResiliencePipeline, RetryOptions, RetryPolicy,
    };
}
