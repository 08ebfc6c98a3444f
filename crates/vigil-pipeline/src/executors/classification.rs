//! CLASSIFICATION: decide which frames VALIDATION runs
//!
//! Order of decisions:
//! 1. Unchanged files are dropped; if none remain, every frame is selected
//!    with reasoning `skipped` and no classifier is consulted.
//! 2. The configured classifier runs when LLM use is enabled; a `None`
//!    answer (or no classifier) falls back to [`HeuristicClassifier`].
//! 3. Adaptive refinement adds frames based on findings already present.
//! 4. An empty selection becomes "every available frame".
//!
//! A classifier `Err` is the one executor failure that aborts the run.

use super::PhaseExecutor;
use crate::classifier::{Classification, ClassificationInput, FrameClassifier, HeuristicClassifier};
use crate::context::{Phase, PipelineContext};
use crate::error::{PipelineError, Result};
use crate::frame::FrameSet;
use crate::types::{CodeFile, FramePriority, LearnedPattern};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reasoning recorded when every file is unchanged
pub const SKIPPED_REASONING: &str = "skipped";

/// Keyword in earlier findings that pulls a frame into the selection
const REFINEMENT_SIGNALS: &[(&str, &str)] = &[("sql", "security")];

/// Rule ids seen at least this often become learned patterns
const LEARNED_PATTERN_MIN_OCCURRENCES: usize = 2;

/// Frame selection phase
#[derive(Clone)]
pub struct ClassificationExecutor {
    frames: FrameSet,
    classifier: Option<Arc<dyn FrameClassifier>>,
    fallback: HeuristicClassifier,
    use_llm: bool,
}

impl std::fmt::Debug for ClassificationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationExecutor")
            .field("frames", &self.frames)
            .field("classifier", &self.classifier.as_ref().map(|c| c.name().to_string()))
            .field("use_llm", &self.use_llm)
            .finish()
    }
}

impl ClassificationExecutor {
    /// Heuristic-only executor over `frames`
    #[must_use]
    pub fn new(frames: FrameSet) -> Self {
        Self {
            frames,
            classifier: None,
            fallback: HeuristicClassifier,
            use_llm: true,
        }
    }

    /// Primary classifier, consulted when LLM use is enabled
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn FrameClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Enable or disable the primary classifier
    #[must_use]
    pub fn with_llm(mut self, enabled: bool) -> Self {
        self.use_llm = enabled;
        self
    }

    fn all_frames(&self) -> Vec<String> {
        self.frames.ids()
    }

    async fn initial(&self, input: &ClassificationInput<'_>) -> Result<Classification> {
        if let (true, Some(classifier)) = (self.use_llm, &self.classifier) {
            let answer = classifier.classify(input).await.map_err(|e| match e {
                PipelineError::Classification(_) => e,
                other => PipelineError::Classification(other.to_string()),
            })?;
            match answer {
                Some(classification) => return Ok(classification),
                None => tracing::info!(classifier = classifier.name(), "classification_fallback"),
            }
        }
        Ok(self.fallback.classify_files(input))
    }

    /// Add frames whose signal appears in findings collected so far
    fn refine(&self, ctx: &PipelineContext, selected: &mut Vec<String>) -> Vec<String> {
        let mut added = Vec::new();
        for (signal, frame) in REFINEMENT_SIGNALS {
            let seen = ctx.findings().iter().any(|f| {
                f.message.to_lowercase().contains(signal) || f.rule_id.to_lowercase().contains(signal)
            });
            if seen && self.frames.contains(frame) && !selected.iter().any(|s| s == frame) {
                selected.push((*frame).to_string());
                added.push((*frame).to_string());
            }
        }
        if !added.is_empty() {
            tracing::info!(added = ?added, "classification_refined");
        }
        added
    }

    fn learned_patterns(ctx: &PipelineContext) -> Vec<LearnedPattern> {
        let mut counts: BTreeMap<&str, (usize, &str)> = BTreeMap::new();
        for finding in ctx.findings() {
            let entry = counts.entry(&finding.rule_id).or_insert((0, &finding.message));
            entry.0 += 1;
        }
        counts
            .into_iter()
            .filter(|(_, (n, _))| *n >= LEARNED_PATTERN_MIN_OCCURRENCES)
            .map(|(rule, (occurrences, message))| LearnedPattern {
                rule_id: rule.to_string(),
                description: message.to_string(),
                occurrences,
            })
            .collect()
    }

    fn priorities_for(&self, selected: &[String], given: &BTreeMap<String, FramePriority>) -> BTreeMap<String, FramePriority> {
        selected
            .iter()
            .map(|id| {
                let tier = given
                    .get(id)
                    .copied()
                    .or_else(|| self.frames.get(id).map(|f| f.priority()))
                    .unwrap_or_default();
                (id.clone(), tier)
            })
            .collect()
    }
}

#[async_trait]
impl PhaseExecutor for ClassificationExecutor {
    fn phase(&self) -> Phase {
        Phase::Classification
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let available = self.all_frames();
        let (changed, unchanged): (Vec<&CodeFile>, Vec<&CodeFile>) =
            ctx.code_files.iter().partition(|f| !ctx.is_unchanged(f));
        let skipped_note = (!unchanged.is_empty()).then(|| {
            let paths: Vec<String> = unchanged.iter().map(|f| f.display_path()).collect();
            format!("skipped unchanged files: {}", paths.join(", "))
        });

        if changed.is_empty() && !ctx.code_files.is_empty() {
            tracing::info!(files = unchanged.len(), "classification_skipped_unchanged");
            ctx.frame_priorities = Some(self.priorities_for(&available, &BTreeMap::new()));
            ctx.selected_frames = Some(available);
            ctx.suppression_rules = Some(Vec::new());
            ctx.classification_reasoning = Some(match skipped_note {
                Some(note) => format!("{SKIPPED_REASONING}; {note}"),
                None => SKIPPED_REASONING.to_string(),
            });
            return Ok(());
        }

        let files: Vec<CodeFile> = changed.into_iter().cloned().collect();
        let input = ClassificationInput {
            files: &files,
            available_frames: &available,
            project: ctx.project_context.as_ref(),
            quality: ctx.quality_metrics.as_ref(),
        };
        let classification = self.initial(&input).await?;

        let mut selected: Vec<String> = Vec::new();
        for frame in classification.selected_frames {
            if self.frames.contains(&frame) && !selected.contains(&frame) {
                selected.push(frame);
            }
        }

        let mut reasoning = classification.reasoning;
        if selected.is_empty() {
            tracing::warn!(pipeline_id = %ctx.pipeline_id, "classification_empty_selection");
            selected.clone_from(&available);
            reasoning = format!("no frames selected, using all available; {reasoning}");
        }
        let refined = self.refine(ctx, &mut selected);
        if !refined.is_empty() {
            reasoning.push_str(&format!("; refined from findings: {}", refined.join(", ")));
        }
        if let Some(note) = skipped_note {
            reasoning.push_str(&format!("; {note}"));
        }

        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            selected = ?selected,
            "classification_completed"
        );
        ctx.frame_priorities = Some(self.priorities_for(&selected, &classification.priorities));
        ctx.selected_frames = Some(selected);
        ctx.suppression_rules = Some(classification.suppression_rules);
        ctx.classification_reasoning = Some(reasoning);
        ctx.learned_patterns = Self::learned_patterns(ctx);
        ctx.advisories.extend(classification.advisories);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ValidationFrame;
    use crate::types::{FileContext, Finding, FrameResult, Severity};
    use std::path::PathBuf;

    struct Stub(&'static str);

    #[async_trait]
    impl ValidationFrame for Stub {
        fn frame_id(&self) -> &str {
            self.0
        }

        async fn execute(&self, _file: &CodeFile) -> Result<FrameResult> {
            Ok(FrameResult::passed(self.0, self.0))
        }
    }

    fn frames(ids: &[&'static str]) -> FrameSet {
        ids.iter().fold(FrameSet::new(), |set, id| set.with(Arc::new(Stub(id))))
    }

    struct Fixed(&'static [&'static str]);

    #[async_trait]
    impl FrameClassifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn classify(&self, _input: &ClassificationInput<'_>) -> Result<Option<Classification>> {
            Ok(Some(Classification {
                selected_frames: self.0.iter().map(ToString::to_string).collect(),
                reasoning: "fixed".into(),
                ..Classification::default()
            }))
        }
    }

    fn mark_unchanged(ctx: &mut PipelineContext, path: &str) {
        let path = PathBuf::from(path);
        ctx.file_contexts.get_or_insert_with(BTreeMap::new).insert(
            path.clone(),
            FileContext {
                path,
                content_hash: String::new(),
                line_count: 1,
                language: "python".into(),
                is_test: false,
                is_unchanged: true,
            },
        );
    }

    #[tokio::test]
    async fn test_all_unchanged_selects_everything() {
        let mut ctx = PipelineContext::new(".", vec![CodeFile::new("a.py", "x = 1")]);
        mark_unchanged(&mut ctx, "a.py");
        let executor = ClassificationExecutor::new(frames(&["security", "orphan"]));
        executor.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.selected_frames(), ["security", "orphan"]);
        let reasoning = ctx.classification_reasoning.unwrap();
        assert!(reasoning.starts_with(SKIPPED_REASONING));
        assert!(reasoning.contains("a.py"));
        assert!(ctx.suppression_rules.is_some());
    }

    #[tokio::test]
    async fn test_sql_signal_adds_security() {
        let mut ctx = PipelineContext::new(".", vec![CodeFile::new("a.md", "notes")]);
        ctx.findings = Some(vec![Finding::new(
            "1",
            "raw-query",
            Severity::High,
            "SQL built from user input",
            "a.py:1",
        )]);
        let executor = ClassificationExecutor::new(frames(&["naming", "security"]))
            .with_classifier(Arc::new(Fixed(&["naming"])));
        executor.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.selected_frames(), ["naming", "security"]);
        assert!(ctx.classification_reasoning.unwrap().contains("refined from findings: security"));

        let executor = ClassificationExecutor::new(frames(&["naming", "security"]))
            .with_classifier(Arc::new(Fixed(&["security", "security"])));
        let mut again = PipelineContext::new(".", vec![CodeFile::new("a.md", "notes")]);
        again.findings = ctx.findings.clone();
        executor.execute(&mut again).await.unwrap();
        assert_eq!(again.selected_frames(), ["security"]);
    }

    #[tokio::test]
    async fn test_empty_selection_falls_back_before_refining() {
        let mut ctx = PipelineContext::new(".", vec![CodeFile::new("a.md", "notes")]);
        ctx.findings = Some(vec![Finding::new(
            "1",
            "raw-query",
            Severity::High,
            "SQL built from user input",
            "a.py:1",
        )]);
        let executor = ClassificationExecutor::new(frames(&["naming", "security"]))
            .with_classifier(Arc::new(Fixed(&[])));
        executor.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.selected_frames(), ["naming", "security"]);
        let reasoning = ctx.classification_reasoning.unwrap();
        assert!(reasoning.starts_with("no frames selected, using all available"));
        assert!(!reasoning.contains("refined from findings"));
    }

    #[tokio::test]
    async fn test_no_match_falls_back_to_all() {
        let mut ctx = PipelineContext::new(".", vec![CodeFile::new("a.txt", "hello")]);
        let executor = ClassificationExecutor::new(frames(&["naming", "magic"]));
        executor.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.selected_frames(), ["naming", "magic"]);
        assert_eq!(ctx.frame_priorities.as_ref().map(BTreeMap::len), Some(2));
    }
}
