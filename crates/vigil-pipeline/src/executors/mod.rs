//! Phase executors
//!
//! One executor per phase. Executors mutate the shared context in place;
//! the orchestrator checks post-conditions after each returns.
//!
//! # Invariant
//!
//! An executor that returns `Err` may have partially populated the
//! context. The orchestrator records the error and keeps whatever was
//! written.

pub mod analysis;
pub mod classification;
pub mod cleaning;
pub mod fortification;
pub mod pre_analysis;
pub mod triage;
pub mod validation;

use crate::context::{Phase, PipelineContext};
use crate::error::Result;
use async_trait::async_trait;

pub use analysis::AnalysisExecutor;
pub use classification::ClassificationExecutor;
pub use cleaning::CleaningExecutor;
pub use fortification::FortificationExecutor;
pub use pre_analysis::{FileHashIndex, PreAnalysisExecutor};
pub use triage::TriageExecutor;
pub use validation::ValidationExecutor;

/// Runs one phase
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Phase implemented
    fn phase(&self) -> Phase;

    /// Populate the phase's fields on `ctx`
    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()>;
}
