//! Phase orchestrator
//!
//! Drives PRE_ANALYSIS through CLEANING over one [`PipelineContext`]:
//!
//! - disabled phases are skipped and not checked
//! - every executed phase has its post-conditions asserted, pass or fail
//! - executor errors are recorded and the run continues, except
//!   classification errors (abort) and blocker failures under fail-fast
//! - verification and baseline run right after VALIDATION
//! - the whole sequence is bounded by the run timeout; completed work is
//!   kept when it fires
//! - state consistency is repaired last, on every path

use crate::checklist::PhaseChecklist;
use crate::classifier::{FrameClassifier, LlmClassifier};
use crate::config::{ExecutionStrategy, PipelineConfig};
use crate::context::{Phase, PipelineContext};
use crate::error::{PipelineError, Result};
use crate::executors::{
    AnalysisExecutor, ClassificationExecutor, CleaningExecutor, FileHashIndex, FortificationExecutor,
    PhaseExecutor, PreAnalysisExecutor, TriageExecutor, ValidationExecutor,
};
use crate::frame::FrameSet;
use crate::llm::{GuardedLlm, LlmClient, LlmDiagnosisModel};
use crate::post_processor::FindingsPostProcessor;
use crate::types::{CodeFile, FrameStatus, PipelineStatus};
use crate::verifier::FindingVerifier;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;
use vigil_healing::{HealingCache, LlmHealer, SelfHealingOrchestrator};

/// Reasoning recorded when frames are chosen by the caller
pub const MANUAL_OVERRIDE_REASONING: &str = "manual frame override";

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Final context
    pub context: PipelineContext,
    /// Final status
    pub status: PipelineStatus,
    /// Frames with status `passed`
    pub frames_passed: usize,
    /// Frames with status `failed`
    pub frames_failed: usize,
    /// Frames with status `skipped`
    pub frames_skipped: usize,
    /// Per-phase progress
    pub checklist: PhaseChecklist,
    /// Wall-clock time
    pub duration: Duration,
}

impl PipelineRun {
    /// Running run over `context`
    #[must_use]
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context,
            status: PipelineStatus::Running,
            frames_passed: 0,
            frames_failed: 0,
            frames_skipped: 0,
            checklist: PhaseChecklist::new(),
            duration: Duration::ZERO,
        }
    }

    /// Serializable summary
    #[must_use]
    pub fn result(&self) -> PipelineResult {
        let ctx = &self.context;
        let mut findings_by_severity = BTreeMap::new();
        for finding in ctx.findings() {
            *findings_by_severity.entry(finding.severity.as_str().to_string()).or_insert(0) += 1;
        }
        PipelineResult {
            pipeline_id: ctx.pipeline_id,
            status: self.status,
            started_at: ctx.started_at,
            completed_at: ctx.completed_at,
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            total_findings: ctx.findings().len(),
            findings_by_severity,
            frames_passed: self.frames_passed,
            frames_failed: self.frames_failed,
            frames_skipped: self.frames_skipped,
            selected_frames: ctx.selected_frames().to_vec(),
            errors: ctx.errors.clone(),
            warnings: ctx.warnings.clone(),
            false_positives: ctx.false_positives.clone(),
            phases: self.checklist.render(),
        }
    }
}

/// Summary handed to reporters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    /// Run id
    pub pipeline_id: Uuid,
    /// Final status
    pub status: PipelineStatus,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock time
    pub duration_ms: u64,
    /// Findings after post-processing
    pub total_findings: usize,
    /// Counts keyed by severity name
    pub findings_by_severity: BTreeMap<String, usize>,
    /// Frames passed
    pub frames_passed: usize,
    /// Frames failed
    pub frames_failed: usize,
    /// Frames skipped
    pub frames_skipped: usize,
    /// Frames that ran
    pub selected_frames: Vec<String>,
    /// Errors
    pub errors: Vec<String>,
    /// Warnings
    pub warnings: Vec<String>,
    /// Finding ids dropped by verification
    pub false_positives: Vec<String>,
    /// Checklist lines
    pub phases: Vec<String>,
}

impl PipelineResult {
    /// Pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs the phase sequence
pub struct PhaseOrchestrator {
    config: PipelineConfig,
    project_root: PathBuf,
    frames: FrameSet,
    llm_client: Option<Arc<dyn LlmClient>>,
    healer: Option<Arc<SelfHealingOrchestrator>>,
    verifier: Option<Arc<dyn FindingVerifier>>,
    classifier: Option<Arc<dyn FrameClassifier>>,
    frame_override: Option<Vec<String>>,
    overrides: BTreeMap<Phase, Arc<dyn PhaseExecutor>>,
}

impl std::fmt::Debug for PhaseOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseOrchestrator")
            .field("config", &self.config)
            .field("project_root", &self.project_root)
            .field("frames", &self.frames)
            .field("frame_override", &self.frame_override)
            .finish_non_exhaustive()
    }
}

impl PhaseOrchestrator {
    /// Orchestrator over `frames` rooted at `project_root`
    #[must_use]
    pub fn new(config: PipelineConfig, project_root: impl Into<PathBuf>, frames: FrameSet) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            frames,
            llm_client: None,
            healer: None,
            verifier: None,
            classifier: None,
            frame_override: None,
            overrides: BTreeMap::new(),
        }
    }

    /// LLM client for classification and fortification
    #[must_use]
    pub fn with_llm(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    /// Healer consulted after LLM retries are exhausted. Without one, each
    /// run opens the project healing cache with an LLM fallback strategy.
    #[must_use]
    pub fn with_healer(mut self, healer: Arc<SelfHealingOrchestrator>) -> Self {
        self.healer = Some(healer);
        self
    }

    /// False-positive verifier
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn FindingVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Primary classifier; always consulted when set
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn FrameClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Run exactly these frames and skip CLASSIFICATION
    #[must_use]
    pub fn with_frame_override(mut self, frame_ids: Vec<String>) -> Self {
        self.frame_override = Some(frame_ids);
        self
    }

    /// Replace the built-in executor of `executor.phase()`
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn PhaseExecutor>) -> Self {
        self.overrides.insert(executor.phase(), executor);
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    async fn guarded_llm(&self) -> Option<Arc<GuardedLlm>> {
        if !self.config.use_llm {
            return None;
        }
        let client = self.llm_client.clone()?;
        let resilience = self.config.resilience.build(client.provider());
        let mut guarded = GuardedLlm::new(Arc::clone(&client), resilience);

        if self.config.healing.enabled {
            let healer = match &self.healer {
                Some(healer) => Arc::clone(healer),
                None => {
                    let model = Arc::new(LlmDiagnosisModel::new(client));
                    let registry = SelfHealingOrchestrator::default_registry(&self.project_root)
                        .with(Arc::new(LlmHealer::new(model)));
                    let store = Arc::new(HealingCache::open(&self.project_root).await);
                    Arc::new(
                        SelfHealingOrchestrator::new(registry, store)
                            .with_max_attempts(self.config.healing.max_attempts),
                    )
                }
            };
            guarded = guarded.with_healer(healer);
        }
        Some(Arc::new(guarded))
    }

    async fn executors(&self) -> Vec<Arc<dyn PhaseExecutor>> {
        let llm = self.guarded_llm().await;

        let mut classification = ClassificationExecutor::new(self.frames.clone()).with_llm(self.config.use_llm);
        if let Some(classifier) = &self.classifier {
            classification = classification.with_classifier(Arc::clone(classifier)).with_llm(true);
        } else if let Some(llm) = &llm {
            classification = classification.with_classifier(Arc::new(LlmClassifier::new(Arc::clone(llm))));
        }

        let mut fortification = FortificationExecutor::new();
        if let Some(llm) = llm {
            fortification = fortification.with_llm(llm);
        }

        let built: [Arc<dyn PhaseExecutor>; 7] = [
            Arc::new(PreAnalysisExecutor::new(self.config.incremental)),
            Arc::new(TriageExecutor::default()),
            Arc::new(AnalysisExecutor),
            Arc::new(classification),
            Arc::new(ValidationExecutor::new(
                self.frames.clone(),
                self.config.strategy,
                self.config.parallel_limit,
                self.config.frame_timeout(),
            )),
            Arc::new(fortification),
            Arc::new(CleaningExecutor),
        ];
        built
            .into_iter()
            .map(|executor| {
                self.overrides
                    .get(&executor.phase())
                    .map_or(executor, Arc::clone)
            })
            .collect()
    }

    fn post_processor(&self) -> FindingsPostProcessor {
        let processor = FindingsPostProcessor::new(&self.project_root, &self.config.baseline_path);
        match &self.verifier {
            Some(verifier) => processor.with_verifier(Arc::clone(verifier)),
            None => processor,
        }
    }

    fn apply_frame_override(&self, ctx: &mut PipelineContext, frame_ids: &[String]) {
        let mut selected = Vec::new();
        for id in frame_ids {
            if !self.frames.contains(id) {
                ctx.add_warning(format!("Frame override names unknown frame '{id}'"));
                continue;
            }
            if !selected.contains(id) {
                selected.push(id.clone());
            }
        }
        ctx.frame_priorities = Some(
            selected
                .iter()
                .filter_map(|id| self.frames.get(id).map(|f| (id.clone(), f.priority())))
                .collect(),
        );
        tracing::info!(frames = ?selected, "frame_override_applied");
        ctx.selected_frames = Some(selected);
        ctx.suppression_rules = Some(Vec::new());
        ctx.classification_reasoning = Some(MANUAL_OVERRIDE_REASONING.to_string());
    }

    async fn after_validation(&self, post: &FindingsPostProcessor, ctx: &mut PipelineContext) {
        if self.config.enable_verification && post.has_verifier() {
            post.verify_findings(ctx).await;
        }
        if self.config.enable_baseline {
            post.apply_baseline(ctx).await;
        }
    }

    /// Returns the error that aborts the run, if any
    async fn run_phases(
        &self,
        executors: &[Arc<dyn PhaseExecutor>],
        post: &FindingsPostProcessor,
        ctx: &mut PipelineContext,
        checklist: &mut PhaseChecklist,
    ) -> Option<PipelineError> {
        for executor in executors {
            let phase = executor.phase();
            let id = phase.as_str();

            if !self.config.phases.is_enabled(phase) {
                checklist.skip(id);
                tracing::debug!(phase = %phase, "phase_disabled");
                continue;
            }
            if phase == Phase::Classification {
                if let Some(frame_ids) = &self.frame_override {
                    checklist.skip(id);
                    self.apply_frame_override(ctx, frame_ids);
                    continue;
                }
            }

            checklist.start(id);
            tracing::info!(pipeline_id = %ctx.pipeline_id, phase = %phase, "phase_started");
            let outcome = executor.execute(ctx).await;
            ctx.assert_phase_complete(phase);

            match outcome {
                Ok(()) => {
                    checklist.complete(id);
                    tracing::info!(pipeline_id = %ctx.pipeline_id, phase = %phase, "phase_completed");
                }
                Err(e) => {
                    checklist.fail(id);
                    let recorded = PipelineError::Executor {
                        phase,
                        reason: e.to_string(),
                    };
                    tracing::error!(pipeline_id = %ctx.pipeline_id, phase = %phase, error = %e, "phase_failed");
                    ctx.add_error(recorded.to_string());

                    if e.is_fatal() {
                        return Some(e);
                    }
                    if self.config.strategy == ExecutionStrategy::FailFast && e.is_blocker() {
                        tracing::warn!(pipeline_id = %ctx.pipeline_id, phase = %phase, "pipeline_stopped_fail_fast");
                        return None;
                    }
                }
            }

            if phase == Phase::Validation {
                self.after_validation(post, ctx).await;
            }
        }
        None
    }

    fn initial_status(ctx: &PipelineContext) -> PipelineStatus {
        let mut any_failed = false;
        let mut blocker_failed = false;
        for result in ctx.frame_results() {
            if result.status == FrameStatus::Failed {
                any_failed = true;
                blocker_failed |= result.is_blocker;
            }
        }
        if !ctx.errors.is_empty() || blocker_failed {
            PipelineStatus::Failed
        } else if any_failed {
            PipelineStatus::CompletedWithFailures
        } else {
            PipelineStatus::Completed
        }
    }

    /// Run every phase over `files`.
    ///
    /// Partial failures and timeouts are reported through the returned
    /// run's status and `errors`. Only a fatal classification error is
    /// returned as `Err`, as [`PipelineError::Aborted`] carrying the
    /// partial run.
    pub async fn execute(&self, files: Vec<CodeFile>) -> Result<PipelineRun> {
        let started = Instant::now();
        let mut ctx = PipelineContext::new(&self.project_root, files);
        let mut checklist = PhaseChecklist::new();
        let executors = self.executors().await;
        let post = self.post_processor();
        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            files = ctx.code_files.len(),
            frames = self.frames.len(),
            strategy = ?self.config.strategy,
            "pipeline_started"
        );

        let timeout = self.config.timeout();
        let outcome = tokio::time::timeout(
            timeout,
            self.run_phases(&executors, &post, &mut ctx, &mut checklist),
        )
        .await;
        let fatal = match outcome {
            Ok(fatal) => fatal,
            Err(_) => {
                tracing::error!(pipeline_id = %ctx.pipeline_id, timeout_secs = timeout.as_secs_f64(), "pipeline_timeout");
                ctx.add_error(format!("Pipeline execution timeout after {}s", timeout.as_secs_f64()));
                if let Some(active) = checklist.active_phase() {
                    checklist.fail(active.as_str());
                }
                None
            }
        };
        for phase in Phase::ALL {
            checklist.skip(phase.as_str());
        }

        let status = Self::initial_status(&ctx);
        let mut run = PipelineRun::new(ctx);
        run.status = status;
        run.checklist = checklist;
        run.duration = started.elapsed();
        FindingsPostProcessor::ensure_state_consistency(&mut run);

        if self.config.incremental && run.context.file_contexts.is_some() {
            if let Err(e) = FileHashIndex::from_context(&run.context).save(&self.project_root).await {
                tracing::warn!(error = %e, "hash_index_write_failed");
            }
        }

        tracing::info!(
            pipeline_id = %run.context.pipeline_id,
            status = %run.status,
            duration_ms = u64::try_from(run.duration.as_millis()).unwrap_or(u64::MAX),
            findings = run.context.findings().len(),
            errors = run.context.errors.len(),
            "pipeline_completed"
        );

        match fatal {
            Some(e) => Err(PipelineError::Aborted {
                reason: e.to_string(),
                run: Box::new(run),
            }),
            None => Ok(run),
        }
    }
}
