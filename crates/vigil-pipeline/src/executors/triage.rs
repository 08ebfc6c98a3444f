//! TRIAGE: assign each file to a lane

use super::PhaseExecutor;
use crate::context::{Phase, PipelineContext};
use crate::error::Result;
use crate::types::{CodeFile, FileContext, Lane, TriageDecision};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static SECURITY_MARKERS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(password|secret|api[_-]?key|token|subprocess|crypto|unsafe)\b|\beval\(|\bexec\(|os\.system|pickle\.loads|\bselect\s+.+\s+from\b",
    )
    .ok()
});

/// Heuristic lane assignment
#[derive(Debug, Clone, Copy)]
pub struct TriageExecutor {
    small_file_lines: usize,
}

impl Default for TriageExecutor {
    fn default() -> Self {
        Self {
            small_file_lines: Self::SMALL_FILE_LINES,
        }
    }
}

impl TriageExecutor {
    /// Files at or under this many lines take the fast lane
    pub const SMALL_FILE_LINES: usize = 20;

    /// Override the small-file threshold
    #[must_use]
    pub fn with_small_file_lines(mut self, lines: usize) -> Self {
        self.small_file_lines = lines;
        self
    }

    /// Lane for one file
    #[must_use]
    pub fn decide(&self, file: &CodeFile, context: Option<&FileContext>) -> TriageDecision {
        let (lane, reason) = if SECURITY_MARKERS
            .as_ref()
            .is_some_and(|re| re.is_match(&file.content))
        {
            (Lane::Deep, "security-sensitive content".to_string())
        } else if context.is_some_and(|c| c.is_test) {
            (Lane::Fast, "test file".to_string())
        } else if file.language == "text" {
            (Lane::Fast, "documentation".to_string())
        } else if file.line_count() <= self.small_file_lines {
            (Lane::Fast, format!("{} lines", file.line_count()))
        } else {
            (Lane::Middle, "default".to_string())
        };
        TriageDecision {
            path: file.path.clone(),
            lane,
            reason,
        }
    }
}

#[async_trait]
impl PhaseExecutor for TriageExecutor {
    fn phase(&self) -> Phase {
        Phase::Triage
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let decisions: BTreeMap<_, _> = ctx
            .code_files
            .iter()
            .map(|file| {
                let context = ctx.file_contexts.as_ref().and_then(|m| m.get(&file.path));
                (file.path.clone(), self.decide(file, context))
            })
            .collect();

        let deep = decisions.values().filter(|d| d.lane == Lane::Deep).count();
        tracing::debug!(files = decisions.len(), deep, "triage_completed");
        ctx.triage_decisions = Some(decisions);
        Ok(())
    }
}
