//! Vigil Healing - automatic diagnosis and recovery of runtime errors
//!
//! A failed operation is turned into an [`ErrorReport`], classified into an
//! [`ErrorCategory`] and handed to prioritized [`HealingStrategy`]s. The
//! first strategy that fixes the problem wins; outcomes are cached per
//! error signature so known fixes replay instantly and known dead ends are
//! skipped.
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil_healing::{ErrorReport, SelfHealingOrchestrator};
//!
//! # async fn example() {
//! let healer = SelfHealingOrchestrator::for_project(".").await;
//! let report = ErrorReport::new("ProviderError", "HTTP 503 service unavailable");
//! let result = healer.diagnose_and_fix(&report, "classification").await;
//! println!("{}", result.diagnosis);
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod attempts;
pub mod cache;
pub mod classifier;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod strategies;
pub mod strategy;

pub use attempts::AttemptTracker;
pub use cache::{HealingCache, HealingStore, MemoryHealingStore};
pub use classifier::ErrorClassifier;
pub use error::{HealingError, Result};
pub use metrics::{HealingMetrics, HealingMetricsCollector};
pub use models::{DiagnosticResult, ErrorCategory, ErrorReport, HealingRecord};
pub use orchestrator::{SelfHealingOrchestrator, DEFAULT_MAX_ATTEMPTS};
pub use registry::StrategyRegistry;
pub use strategies::{
    ConfigHealer, DiagnosisModel, ImportHealer, LlmHealer, ProviderHealer, LLM_HEALER,
};
pub use strategy::{HealOutcome, HealingStrategy};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        DiagnosticResult, ErrorCategory, ErrorReport, HealOutcome, HealingStore,
        HealingStrategy, SelfHealingOrchestrator, StrategyRegistry,
    };
}
