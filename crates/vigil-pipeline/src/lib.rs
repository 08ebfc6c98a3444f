//! Vigil Pipeline - phase orchestration for code-quality runs
//!
//! A run moves one [`PipelineContext`] through seven ordered phases:
//!
//! ```text
//! PRE_ANALYSIS -> TRIAGE -> ANALYSIS -> CLASSIFICATION -> VALIDATION -> FORTIFICATION -> CLEANING
//! ```
//!
//! Each phase must populate the context fields declared for it; violations
//! are reported as warnings. After VALIDATION the [`FindingsPostProcessor`]
//! drops unverified and baselined findings, and repairs the final status.
//! LLM calls go through a [`GuardedLlm`]: retries and a circuit breaker
//! from `vigil-resilience`, then the `vigil-healing` orchestrator.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil_pipeline::prelude::*;
//!
//! # async fn example(frame: Arc<dyn ValidationFrame>) -> vigil_pipeline::Result<()> {
//! let frames = FrameSet::new().with(frame);
//! let orchestrator = PhaseOrchestrator::new(PipelineConfig::default(), ".", frames);
//! let run = orchestrator
//!     .execute(vec![CodeFile::read("src/app.py").await?])
//!     .await?;
//! println!("{}", run.result().to_json()?);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod baseline;
pub mod checklist;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod executors;
pub mod frame;
pub mod llm;
pub mod orchestrator;
pub mod post_processor;
pub mod telemetry;
pub mod types;
pub mod verifier;

pub use baseline::Baseline;
pub use checklist::{PhaseChecklist, PhaseState};
pub use classifier::{
    Classification, ClassificationInput, FrameClassifier, HeuristicClassifier, LlmClassifier,
};
pub use config::{ExecutionStrategy, HealingSettings, PhaseToggles, PipelineConfig, ResilienceSettings};
pub use context::{ContextField, Phase, PipelineContext};
pub use error::{ConfigError, PipelineError, Result};
pub use executors::PhaseExecutor;
pub use frame::{FrameSet, ValidationFrame};
pub use llm::{GuardedLlm, LlmClient, LlmDiagnosisModel, LlmRequest, LlmResponse};
pub use orchestrator::{PhaseOrchestrator, PipelineResult, PipelineRun};
pub use post_processor::FindingsPostProcessor;
pub use telemetry::init_tracing;
pub use types::{
    CodeFile, Finding, FramePriority, FrameResult, FrameStatus, PipelineStatus, Severity,
    SuppressionRule,
};
pub use verifier::FindingVerifier;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        CodeFile, ExecutionStrategy, Finding, FindingVerifier, FrameClassifier, FrameResult,
        FrameSet, FrameStatus, LlmClient, Phase, PhaseOrchestrator, PipelineConfig, PipelineContext,
        PipelineStatus, Severity, ValidationFrame,
    };
}
