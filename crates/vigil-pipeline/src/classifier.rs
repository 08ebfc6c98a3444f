//! Frame classifiers
//!
//! A classifier turns the changed files into a frame selection.
//! [`HeuristicClassifier`] is static and always succeeds; [`LlmClassifier`]
//! asks the model and returns `None` when it cannot produce a usable
//! answer, which sends the caller to the heuristic fallback.

use crate::error::Result;
use crate::llm::{strip_code_fence, GuardedLlm, LlmRequest};
use crate::types::{CodeFile, FramePriority, ProjectContext, QualityMetrics, SuppressionRule};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// What a classifier gets to look at
#[derive(Debug, Clone, Copy)]
pub struct ClassificationInput<'a> {
    /// Files to classify (unchanged files already removed)
    pub files: &'a [CodeFile],
    /// Frame ids that exist
    pub available_frames: &'a [String],
    /// PRE_ANALYSIS output
    pub project: Option<&'a ProjectContext>,
    /// ANALYSIS output
    pub quality: Option<&'a QualityMetrics>,
}

/// Classifier decision
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Frames to run
    pub selected_frames: Vec<String>,
    /// Suppressions
    pub suppression_rules: Vec<SuppressionRule>,
    /// Tier per frame
    pub priorities: BTreeMap<String, FramePriority>,
    /// Why
    pub reasoning: String,
    /// Free-form notes for the user
    pub advisories: Vec<String>,
}

/// Frame selection strategy
#[async_trait]
pub trait FrameClassifier: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str;

    /// `Ok(None)` means "no answer, use the fallback". An `Err` is fatal
    /// to the run.
    async fn classify(&self, input: &ClassificationInput<'_>) -> Result<Option<Classification>>;
}

/// Default tier for well-known frames
#[must_use]
pub fn default_priority(frame_id: &str) -> FramePriority {
    match frame_id {
        "security" => FramePriority::Critical,
        "chaos" | "orphan" => FramePriority::High,
        "architecture" | "stress" => FramePriority::Medium,
        _ => FramePriority::Low,
    }
}

const NETWORK_ASYNC: &[&str] = &[
    "async ", "await", "tokio", "asyncio", "thread", "socket", "http", "requests.", "grpc",
];
const WEB_FRAMEWORKS: &[&str] = &[
    "flask", "django", "fastapi", "express", "axum", "actix", "rocket", "spring", "rails",
];
const PARSERS: &[&str] = &[
    "parse", "json", "yaml", "xml", "deserialize", "argparse", "clap", "unpack", "pickle",
];
const TYPE_HEAVY: &[&str] = &[
    "@dataclass", "typing", "interface ", "trait ", "struct ", "enum ", "pydantic", "generic",
];

/// Static rule-based classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    /// Quality score below which `orphan` is added
    pub const ORPHAN_SCORE_THRESHOLD: f64 = 7.0;

    /// Classify without I/O
    #[must_use]
    pub fn classify_files(&self, input: &ClassificationInput<'_>) -> Classification {
        let combined = input
            .files
            .iter()
            .map(|f| f.content.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");
        let mentions = |patterns: &[&str]| patterns.iter().any(|p| combined.contains(p));

        let mut wanted: Vec<(&str, String)> = vec![("security", "always included".to_string())];
        if let Some(q) = input.quality {
            if q.overall_score < Self::ORPHAN_SCORE_THRESHOLD {
                wanted.push(("orphan", format!("quality score {:.1}", q.overall_score)));
            }
        }
        if mentions(NETWORK_ASYNC) {
            wanted.push(("chaos", "network/async code".into()));
        }
        let modules = input.project.map_or_else(
            || {
                input
                    .files
                    .iter()
                    .filter_map(|f| f.path.parent())
                    .collect::<BTreeSet<_>>()
                    .len()
            },
            |p| p.module_count,
        );
        if modules > 1 {
            wanted.push(("architecture", format!("{modules} modules")));
        }
        let has_framework = input.project.is_some_and(|p| !p.frameworks.is_empty());
        if has_framework || mentions(WEB_FRAMEWORKS) {
            wanted.push(("stress", "web framework".into()));
        }
        if mentions(PARSERS) {
            wanted.push(("fuzz", "parsing/deserialization".into()));
        }
        if mentions(TYPE_HEAVY) {
            wanted.push(("property", "type-heavy code".into()));
        }

        let mut classification = Classification::default();
        let mut reasons = Vec::new();
        for (frame, why) in wanted {
            if !input.available_frames.iter().any(|f| f == frame) {
                continue;
            }
            if classification.selected_frames.iter().any(|f| f == frame) {
                continue;
            }
            classification.selected_frames.push(frame.to_string());
            classification
                .priorities
                .insert(frame.to_string(), default_priority(frame));
            reasons.push(format!("{frame}: {why}"));
        }
        classification.reasoning = format!("heuristic: {}", reasons.join("; "));
        classification
    }
}

#[async_trait]
impl FrameClassifier for HeuristicClassifier {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn classify(&self, input: &ClassificationInput<'_>) -> Result<Option<Classification>> {
        Ok(Some(self.classify_files(input)))
    }
}

#[derive(Debug, Deserialize)]
struct LlmAnswer {
    #[serde(default)]
    selected_frames: Vec<String>,
    #[serde(default)]
    suppression_rules: Vec<SuppressionRule>,
    #[serde(default)]
    priorities: BTreeMap<String, String>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    advisories: Vec<String>,
}

/// Model-backed classifier
#[derive(Debug, Clone)]
pub struct LlmClassifier {
    llm: Arc<GuardedLlm>,
}

impl LlmClassifier {
    const SYSTEM_PROMPT: &'static str = "You select validation frames for a code-quality pipeline. \
        Answer with JSON only: {\"selected_frames\": [...], \"suppression_rules\": \
        [{\"pattern\": \"glob\", \"frames\": [...], \"reason\": \"...\"}], \
        \"priorities\": {\"frame\": \"critical|high|medium|low\"}, \"reasoning\": \"...\", \
        \"advisories\": [...]}";

    /// Wrap a guarded client
    #[must_use]
    pub fn new(llm: Arc<GuardedLlm>) -> Self {
        Self { llm }
    }

    fn prompt(input: &ClassificationInput<'_>) -> String {
        let mut prompt = format!("Available frames: {}\n", input.available_frames.join(", "));
        if let Some(project) = input.project {
            prompt.push_str(&format!(
                "Languages: {}; frameworks: {}\n",
                project.languages.join(", "),
                project.frameworks.join(", ")
            ));
        }
        prompt.push_str("Files:\n");
        for file in input.files {
            let head: String = file.content.lines().take(40).collect::<Vec<_>>().join("\n");
            prompt.push_str(&format!("--- {} ({})\n{head}\n", file.display_path(), file.language));
        }
        prompt
    }

    /// Parse a model answer; `None` when unusable
    #[must_use]
    pub fn parse_answer(content: &str, available: &[String]) -> Option<Classification> {
        let answer: LlmAnswer = match serde_json::from_str(strip_code_fence(content)) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "llm_classification_unparseable");
                return None;
            }
        };

        let mut selected: Vec<String> = Vec::new();
        for frame in answer.selected_frames {
            if available.contains(&frame) && !selected.contains(&frame) {
                selected.push(frame);
            }
        }
        let priorities = selected
            .iter()
            .map(|f| {
                let tier = answer
                    .priorities
                    .get(f)
                    .and_then(|p| p.parse().ok())
                    .unwrap_or_else(|| default_priority(f));
                (f.clone(), tier)
            })
            .collect();

        Some(Classification {
            selected_frames: selected,
            suppression_rules: answer.suppression_rules,
            priorities,
            reasoning: if answer.reasoning.is_empty() {
                "llm".to_string()
            } else {
                answer.reasoning
            },
            advisories: answer.advisories,
        })
    }
}

#[async_trait]
impl FrameClassifier for LlmClassifier {
    fn name(&self) -> &str {
        "llm"
    }

    async fn classify(&self, input: &ClassificationInput<'_>) -> Result<Option<Classification>> {
        let request = LlmRequest::new(Self::SYSTEM_PROMPT, Self::prompt(input))
            .with_temperature(0.0)
            .with_max_tokens(1024);
        match self.llm.complete(&request, "classification").await {
            Ok(content) => Ok(Self::parse_answer(&content, input.available_frames)),
            Err(e) => {
                tracing::warn!(error = %e, "llm_classification_failed");
                Ok(None)
            }
        }
    }
}
