//! Error types for resilience primitives
//!
//! The wrapped operation's own error is never rewritten: it is carried
//! verbatim in [`ResilienceError::Operation`] so callers can branch on the
//! concrete type.

use std::time::Duration;

/// Error returned by a guarded call
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError<E> {
    /// Circuit breaker rejected the call without invoking the operation
    #[error("Circuit breaker is OPEN (retry after {}ms)", retry_after.as_millis())]
    CircuitOpen {
        /// Time left until the breaker allows a trial call
        retry_after: Duration,
    },

    /// A single attempt exceeded its time budget
    #[error("operation timed out after {}ms", after.as_millis())]
    Timeout {
        /// Budget that was exceeded
        after: Duration,
    },

    /// Bulkhead had no free slot
    #[error("bulkhead full: {max_concurrent} calls in flight")]
    BulkheadFull {
        /// Configured concurrency limit
        max_concurrent: usize,
    },

    /// The operation itself failed
    #[error("{0}")]
    Operation(E),
}

impl<E> ResilienceError<E> {
    /// True when the breaker refused the call
    #[inline]
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// True when the attempt ran out of time
    #[inline]
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Borrow the operation's own error, if that is what failed
    #[inline]
    #[must_use]
    pub const fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Take the operation's own error, if that is what failed
    #[inline]
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Map the operation error, keeping guard errors as they are
    pub fn map_operation<F, T>(self, f: F) -> ResilienceError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::CircuitOpen { retry_after } => ResilienceError::CircuitOpen { retry_after },
            Self::Timeout { after } => ResilienceError::Timeout { after },
            Self::BulkheadFull { max_concurrent } => ResilienceError::BulkheadFull { max_concurrent },
            Self::Operation(e) => ResilienceError::Operation(f(e)),
        }
    }
}

/// Shorten an error summary for log lines
pub(crate) fn truncate_summary(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut out: String = message.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
