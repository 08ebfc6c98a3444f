//! False-positive verification contract

use crate::context::PipelineContext;
use crate::error::Result;
use crate::types::Finding;
use async_trait::async_trait;
use std::collections::HashSet;

/// Judges which findings are genuine
#[async_trait]
pub trait FindingVerifier: Send + Sync {
    /// Ids of the findings in `findings` that are real issues
    async fn verify(&self, findings: &[Finding], context: &PipelineContext) -> Result<HashSet<String>>;
}
