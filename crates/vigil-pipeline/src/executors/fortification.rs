//! FORTIFICATION: hardening suggestions for severe findings

use super::PhaseExecutor;
use crate::context::{Phase, PipelineContext};
use crate::error::Result;
use crate::llm::{GuardedLlm, LlmRequest};
use crate::types::{Finding, Fortification};
use async_trait::async_trait;
use std::sync::Arc;

const TEMPLATES: &[(&[&str], &str, &str)] = &[
    (
        &["sql", "injection"],
        "Use parameterized queries",
        "Pass user input as bound parameters instead of formatting it into the query string.",
    ),
    (
        &["secret", "password", "token", "key"],
        "Move secrets out of source",
        "Load the value from the environment or a secret manager and rotate the exposed credential.",
    ),
    (
        &["xss", "html", "template"],
        "Escape rendered output",
        "Render user-controlled values through the template engine's escaping helpers.",
    ),
    (
        &["eval", "exec", "command", "shell"],
        "Avoid dynamic execution",
        "Replace dynamic evaluation with an explicit dispatch table or a fixed argument list.",
    ),
];

const GENERIC: (&str, &str) = (
    "Add input validation",
    "Validate inputs at the boundary and fail closed on unexpected values.",
);

/// Suggestion generator
#[derive(Debug, Clone)]
pub struct FortificationExecutor {
    llm: Option<Arc<GuardedLlm>>,
    max_llm_suggestions: usize,
}

impl Default for FortificationExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl FortificationExecutor {
    /// Findings per run sent to the model; the rest use templates
    pub const DEFAULT_MAX_LLM_SUGGESTIONS: usize = 10;

    /// Template-only executor
    #[must_use]
    pub fn new() -> Self {
        Self {
            llm: None,
            max_llm_suggestions: Self::DEFAULT_MAX_LLM_SUGGESTIONS,
        }
    }

    /// Ask the model for suggestions first
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<GuardedLlm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Cap on model calls per run
    #[must_use]
    pub fn with_max_llm_suggestions(mut self, max: usize) -> Self {
        self.max_llm_suggestions = max;
        self
    }

    /// Template suggestion for `finding`
    #[must_use]
    pub fn template(finding: &Finding) -> (String, String) {
        let haystack = format!("{} {}", finding.rule_id, finding.message).to_lowercase();
        let (title, body) = TEMPLATES
            .iter()
            .find(|(keywords, _, _)| keywords.iter().any(|k| haystack.contains(k)))
            .map_or(GENERIC, |(_, title, body)| (*title, *body));
        (title.to_string(), body.to_string())
    }

    async fn suggest(&self, llm: &GuardedLlm, finding: &Finding) -> Option<String> {
        let request = LlmRequest::new(
            "You are a security reviewer. Reply with one short, concrete remediation for the finding.",
            format!(
                "Rule: {}\nSeverity: {}\nLocation: {}\nMessage: {}\n{}",
                finding.rule_id,
                finding.severity,
                finding.location,
                finding.message,
                finding.code.as_deref().unwrap_or_default()
            ),
        )
        .with_max_tokens(256);
        match llm.complete(&request, "fortification").await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(finding_id = %finding.id, error = %e, "fortification_llm_failed");
                None
            }
        }
    }
}

#[async_trait]
impl PhaseExecutor for FortificationExecutor {
    fn phase(&self) -> Phase {
        Phase::Fortification
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let severe: Vec<(String, Finding)> = ctx
            .frame_results()
            .flat_map(|r| r.findings.iter().map(move |f| (r.frame_id.clone(), f)))
            .filter(|(_, f)| f.severity.is_severe())
            .map(|(frame, f)| (frame, f.clone()))
            .collect();

        let mut fortifications = Vec::with_capacity(severe.len());
        for (index, (frame_id, finding)) in severe.into_iter().enumerate() {
            let (title, template) = Self::template(&finding);
            let suggestion = match &self.llm {
                Some(llm) if index < self.max_llm_suggestions => {
                    self.suggest(llm, &finding).await.unwrap_or(template)
                }
                _ => template,
            };
            fortifications.push(Fortification {
                finding_id: finding.id.clone(),
                frame_id,
                file_path: finding.path().to_string(),
                title,
                suggestion,
            });
        }

        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            suggestions = fortifications.len(),
            "fortification_completed"
        );
        ctx.fortifications = Some(fortifications);
        Ok(())
    }
}
