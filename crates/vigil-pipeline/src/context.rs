//! Shared run state and phase post-conditions
//!
//! One [`PipelineContext`] exists per run. Each phase populates the fields
//! listed for it in [`Phase::required_fields`]; those fields are `Option`s
//! so "never written" (`None`) can be told apart from "written, empty"
//! (`Some(vec![])`). The phase/field mapping is a pair of enums matched
//! exhaustively, so renaming a field breaks the build instead of a
//! runtime check.

use crate::types::{
    CleaningSuggestion, CodeFile, FileContext, Finding, Fortification, FramePriority, FrameResult,
    Hotspot, LearnedPattern, ProjectContext, QualityMetrics, SuppressionRule, TriageDecision,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// File hashing and project facts
    PreAnalysis,
    /// Lane assignment
    Triage,
    /// Quality metrics
    Analysis,
    /// Frame selection
    Classification,
    /// Frame execution
    Validation,
    /// Hardening suggestions
    Fortification,
    /// Cleanup suggestions
    Cleaning,
}

impl Phase {
    /// All phases in order
    pub const ALL: [Self; 7] = [
        Self::PreAnalysis,
        Self::Triage,
        Self::Analysis,
        Self::Classification,
        Self::Validation,
        Self::Fortification,
        Self::Cleaning,
    ];

    /// Stable id, e.g. `PRE_ANALYSIS`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreAnalysis => "PRE_ANALYSIS",
            Self::Triage => "TRIAGE",
            Self::Analysis => "ANALYSIS",
            Self::Classification => "CLASSIFICATION",
            Self::Validation => "VALIDATION",
            Self::Fortification => "FORTIFICATION",
            Self::Cleaning => "CLEANING",
        }
    }

    /// Fields the phase must populate
    #[must_use]
    pub const fn required_fields(self) -> &'static [ContextField] {
        match self {
            Self::PreAnalysis => &[ContextField::ProjectContext, ContextField::FileContexts],
            Self::Triage => &[ContextField::TriageDecisions],
            Self::Analysis => &[ContextField::QualityMetrics, ContextField::Hotspots],
            Self::Classification => &[
                ContextField::SelectedFrames,
                ContextField::SuppressionRules,
                ContextField::FramePriorities,
                ContextField::ClassificationReasoning,
            ],
            Self::Validation => &[ContextField::FrameResults, ContextField::Findings],
            Self::Fortification => &[ContextField::Fortifications],
            Self::Cleaning => &[ContextField::CleaningSuggestions],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    /// Case-insensitive; `-` and `_` are interchangeable
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("unknown phase: {s}"))
    }
}

/// Context field covered by a phase post-condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    /// `project_context`
    ProjectContext,
    /// `file_contexts`
    FileContexts,
    /// `triage_decisions`
    TriageDecisions,
    /// `quality_metrics`
    QualityMetrics,
    /// `hotspots`
    Hotspots,
    /// `selected_frames`
    SelectedFrames,
    /// `suppression_rules`
    SuppressionRules,
    /// `frame_priorities`
    FramePriorities,
    /// `classification_reasoning`
    ClassificationReasoning,
    /// `frame_results`
    FrameResults,
    /// `findings`
    Findings,
    /// `fortifications`
    Fortifications,
    /// `cleaning_suggestions`
    CleaningSuggestions,
}

impl ContextField {
    /// Field name on [`PipelineContext`]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProjectContext => "project_context",
            Self::FileContexts => "file_contexts",
            Self::TriageDecisions => "triage_decisions",
            Self::QualityMetrics => "quality_metrics",
            Self::Hotspots => "hotspots",
            Self::SelectedFrames => "selected_frames",
            Self::SuppressionRules => "suppression_rules",
            Self::FramePriorities => "frame_priorities",
            Self::ClassificationReasoning => "classification_reasoning",
            Self::FrameResults => "frame_results",
            Self::Findings => "findings",
            Self::Fortifications => "fortifications",
            Self::CleaningSuggestions => "cleaning_suggestions",
        }
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state shared by all phases of one run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineContext {
    /// Run id
    pub pipeline_id: Uuid,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Set when the run finishes
    pub completed_at: Option<DateTime<Utc>>,
    /// Root used to relativize paths
    pub project_root: PathBuf,
    /// Primary input path
    pub file_path: Option<PathBuf>,
    /// Primary input source
    pub source_code: Option<String>,
    /// All input files
    #[serde(skip)]
    pub code_files: Vec<CodeFile>,

    /// PRE_ANALYSIS
    pub project_context: Option<ProjectContext>,
    /// PRE_ANALYSIS
    pub file_contexts: Option<BTreeMap<PathBuf, FileContext>>,

    /// TRIAGE
    pub triage_decisions: Option<BTreeMap<PathBuf, TriageDecision>>,

    /// ANALYSIS
    pub quality_metrics: Option<QualityMetrics>,
    /// ANALYSIS
    pub hotspots: Option<Vec<Hotspot>>,

    /// CLASSIFICATION
    pub selected_frames: Option<Vec<String>>,
    /// CLASSIFICATION
    pub suppression_rules: Option<Vec<SuppressionRule>>,
    /// CLASSIFICATION
    pub frame_priorities: Option<BTreeMap<String, FramePriority>>,
    /// CLASSIFICATION
    pub classification_reasoning: Option<String>,
    /// CLASSIFICATION
    pub learned_patterns: Vec<LearnedPattern>,
    /// CLASSIFICATION
    pub advisories: Vec<String>,

    /// VALIDATION, keyed by frame id in completion order
    pub frame_results: Option<IndexMap<String, FrameResult>>,
    /// Derived from `frame_results`; rebuilt, never edited in place
    pub findings: Option<Vec<Finding>>,
    /// Finding ids dropped by verification
    pub false_positives: Vec<String>,

    /// FORTIFICATION
    pub fortifications: Option<Vec<Fortification>>,
    /// CLEANING
    pub cleaning_suggestions: Option<Vec<CleaningSuggestion>>,

    /// Append-only
    pub errors: Vec<String>,
    /// Append-only
    pub warnings: Vec<String>,
}

impl PipelineContext {
    /// Fresh context; every post-condition field unset
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>, code_files: Vec<CodeFile>) -> Self {
        let (file_path, source_code) = match code_files.as_slice() {
            [single] => (Some(single.path.clone()), Some(single.content.clone())),
            _ => (None, None),
        };
        Self {
            pipeline_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            project_root: project_root.into(),
            file_path,
            source_code,
            code_files,
            project_context: None,
            file_contexts: None,
            triage_decisions: None,
            quality_metrics: None,
            hotspots: None,
            selected_frames: None,
            suppression_rules: None,
            frame_priorities: None,
            classification_reasoning: None,
            learned_patterns: Vec::new(),
            advisories: Vec::new(),
            frame_results: None,
            findings: None,
            false_positives: Vec::new(),
            fortifications: None,
            cleaning_suggestions: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Whether `field` has been written
    #[must_use]
    pub const fn is_set(&self, field: ContextField) -> bool {
        match field {
            ContextField::ProjectContext => self.project_context.is_some(),
            ContextField::FileContexts => self.file_contexts.is_some(),
            ContextField::TriageDecisions => self.triage_decisions.is_some(),
            ContextField::QualityMetrics => self.quality_metrics.is_some(),
            ContextField::Hotspots => self.hotspots.is_some(),
            ContextField::SelectedFrames => self.selected_frames.is_some(),
            ContextField::SuppressionRules => self.suppression_rules.is_some(),
            ContextField::FramePriorities => self.frame_priorities.is_some(),
            ContextField::ClassificationReasoning => self.classification_reasoning.is_some(),
            ContextField::FrameResults => self.frame_results.is_some(),
            ContextField::Findings => self.findings.is_some(),
            ContextField::Fortifications => self.fortifications.is_some(),
            ContextField::CleaningSuggestions => self.cleaning_suggestions.is_some(),
        }
    }

    /// Check the post-conditions of `phase`.
    ///
    /// Advisory only: violations are returned, appended to `warnings` and
    /// logged, but never fail the run.
    pub fn assert_phase_complete(&mut self, phase: Phase) -> Vec<ContextField> {
        let violations: Vec<ContextField> = phase
            .required_fields()
            .iter()
            .copied()
            .filter(|field| !self.is_set(*field))
            .collect();

        for field in &violations {
            self.warnings.push(format!(
                "Pipeline {}: phase {phase} did not populate required field '{field}'",
                self.pipeline_id
            ));
            tracing::warn!(
                pipeline_id = %self.pipeline_id,
                phase = %phase,
                field = %field,
                "phase_postcondition_violated"
            );
        }
        violations
    }

    /// Same as [`assert_phase_complete`](Self::assert_phase_complete) by id;
    /// unknown ids have no post-conditions
    pub fn assert_phase_complete_by_id(&mut self, phase_id: &str) -> Vec<ContextField> {
        match phase_id.parse::<Phase>() {
            Ok(phase) => self.assert_phase_complete(phase),
            Err(_) => {
                tracing::debug!(phase_id, "phase_postcondition_unknown_phase");
                Vec::new()
            }
        }
    }

    /// Record an error
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Record a warning
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Store a frame result, replacing an earlier one with the same id
    pub fn insert_frame_result(&mut self, result: FrameResult) {
        self.frame_results
            .get_or_insert_with(IndexMap::new)
            .insert(result.frame_id.clone(), result);
    }

    /// Frame results, empty when VALIDATION has not run
    pub fn frame_results(&self) -> impl Iterator<Item = &FrameResult> {
        self.frame_results.iter().flat_map(IndexMap::values)
    }

    /// Rebuild `findings` as the concatenation of per-frame findings
    pub fn rebuild_findings(&mut self) {
        let all = self
            .frame_results()
            .flat_map(|r| r.findings.iter().cloned())
            .collect();
        self.findings = Some(all);
    }

    /// Findings so far (empty when unset)
    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        self.findings.as_deref().unwrap_or_default()
    }

    /// Frames selected for validation (empty when unset)
    #[must_use]
    pub fn selected_frames(&self) -> &[String] {
        self.selected_frames.as_deref().unwrap_or_default()
    }

    /// Whether the file is marked unchanged since the last run
    #[must_use]
    pub fn is_unchanged(&self, file: &CodeFile) -> bool {
        self.file_contexts
            .as_ref()
            .and_then(|m| m.get(&file.path))
            .is_some_and(|c| c.is_unchanged)
    }
}
