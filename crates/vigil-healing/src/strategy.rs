//! Healing strategy interface

use crate::error::Result;
use crate::models::{DiagnosticResult, ErrorCategory, ErrorReport};
use async_trait::async_trait;

/// Result of a strategy run that completed normally
#[derive(Debug, Clone, PartialEq)]
pub enum HealOutcome {
    /// The problem was repaired; no further strategies are tried
    Fixed(DiagnosticResult),
    /// Only a diagnosis was produced; the orchestrator keeps looking
    Diagnosis(DiagnosticResult),
}

impl HealOutcome {
    /// True for [`HealOutcome::Fixed`]
    #[inline]
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// Unwrap into a result with a consistent `fixed` flag
    #[must_use]
    pub fn into_result(self) -> DiagnosticResult {
        match self {
            Self::Fixed(mut r) => {
                r.fixed = true;
                r.should_retry = true;
                r
            }
            Self::Diagnosis(mut r) => {
                r.fixed = false;
                r
            }
        }
    }
}

/// A recovery strategy for one or more error categories
#[async_trait]
pub trait HealingStrategy: Send + Sync {
    /// Unique name, recorded in the cache
    fn name(&self) -> &str;

    /// Categories this strategy is registered for
    fn handles(&self) -> &[ErrorCategory];

    /// Higher runs first
    fn priority(&self) -> i32 {
        100
    }

    /// Cheap pre-check before `heal`
    async fn can_heal(&self, error: &ErrorReport, category: ErrorCategory) -> bool;

    /// Attempt recovery. `Err` is reserved for unexpected failures.
    async fn heal(&self, error: &ErrorReport, context: &str) -> Result<HealOutcome>;
}
