//! Findings post-processing
//!
//! Runs after VALIDATION, in this order:
//! 1. [`verify_findings`](FindingsPostProcessor::verify_findings): drop
//!    findings the verifier rejects (fail-open)
//! 2. [`apply_baseline`](FindingsPostProcessor::apply_baseline): drop
//!    findings already present in the baseline
//! 3. [`ensure_state_consistency`](FindingsPostProcessor::ensure_state_consistency):
//!    repair the final status, always last
//!
//! Per-frame findings lists are only ever replaced wholesale, and
//! `context.findings` is rebuilt from them after each step.

use crate::baseline::Baseline;
use crate::context::PipelineContext;
use crate::orchestrator::PipelineRun;
use crate::types::{FrameResult, FrameStatus, PipelineStatus};
use crate::verifier::FindingVerifier;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

/// Synthetic error appended when a run is FAILED without explanation
pub const UNEXPLAINED_FAILURE: &str = "Pipeline marked FAILED but no errors recorded";

/// Verification, baseline and consistency passes
#[derive(Clone)]
pub struct FindingsPostProcessor {
    project_root: PathBuf,
    baseline_path: PathBuf,
    verifier: Option<Arc<dyn FindingVerifier>>,
}

impl std::fmt::Debug for FindingsPostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindingsPostProcessor")
            .field("project_root", &self.project_root)
            .field("baseline_path", &self.baseline_path)
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

impl FindingsPostProcessor {
    /// `baseline_path` is resolved against `project_root` when relative
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>, baseline_path: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            baseline_path: baseline_path.into(),
            verifier: None,
        }
    }

    /// Attach a verifier
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn FindingVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Whether a verifier is attached
    #[must_use]
    pub fn has_verifier(&self) -> bool {
        self.verifier.is_some()
    }

    fn relabel_if_emptied(result: &mut FrameResult, reason: &str) {
        if result.findings.is_empty()
            && result.status == FrameStatus::Failed
            && !result.has_blocker_violation()
        {
            result.status = FrameStatus::Passed;
            tracing::info!(
                frame_id = %result.frame_id,
                old_status = "failed",
                new_status = "passed",
                reason,
                "frame_status_corrected"
            );
        }
    }

    /// Remove findings the verifier does not confirm. A verifier error
    /// leaves that frame untouched.
    pub async fn verify_findings(&self, ctx: &mut PipelineContext) {
        let Some(verifier) = &self.verifier else {
            return;
        };
        let frame_ids: Vec<String> = ctx
            .frame_results
            .iter()
            .flat_map(|m| m.keys().cloned())
            .collect();

        let (mut verified, mut dropped) = (0usize, 0usize);
        for frame_id in frame_ids {
            let findings = match ctx.frame_results.as_ref().and_then(|m| m.get(&frame_id)) {
                Some(result) if !result.findings.is_empty() => result.findings.clone(),
                _ => continue,
            };

            let valid = match verifier.verify(&findings, ctx).await {
                Ok(valid) => valid,
                Err(e) => {
                    tracing::warn!(frame_id = %frame_id, error = %e, "finding_verification_failed");
                    continue;
                }
            };

            let total = findings.len();
            let (kept, rejected): (Vec<_>, Vec<_>) =
                findings.into_iter().partition(|f| valid.contains(&f.id));
            verified += kept.len();
            dropped += rejected.len();
            ctx.false_positives.extend(rejected.into_iter().map(|f| f.id));

            if let Some(result) = ctx.frame_results.as_mut().and_then(|m| m.get_mut(&frame_id)) {
                result.replace_findings(kept);
                Self::relabel_if_emptied(result, "all_findings_filtered_by_verification");
                tracing::debug!(
                    frame_id = %frame_id,
                    total,
                    verified = result.issues_found,
                    "finding_verification_complete"
                );
            }
        }

        if ctx.frame_results.is_some() {
            ctx.rebuild_findings();
        }
        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            verified,
            dropped,
            "verification_completed"
        );
    }

    /// Drop findings whose `rule_id:relative_path` key is in the baseline.
    /// Returns the number suppressed; a missing baseline is a no-op.
    pub async fn apply_baseline(&self, ctx: &mut PipelineContext) -> usize {
        let path = self.project_root.join(&self.baseline_path);
        let baseline = match Baseline::load(&path, &self.project_root).await {
            Ok(Some(baseline)) if !baseline.is_empty() => baseline,
            Ok(_) => return 0,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "baseline_application_failed");
                return 0;
            }
        };
        tracing::debug!(known_issues = baseline.len(), "baseline_loaded");

        let root = &self.project_root;
        let mut suppressed = 0;
        for result in ctx.frame_results.iter_mut().flat_map(|m| m.values_mut()) {
            if result.findings.is_empty() {
                continue;
            }
            let before = result.findings.len();
            let kept: Vec<_> = result
                .findings
                .iter()
                .filter(|f| !baseline.contains(f, root))
                .cloned()
                .collect();
            suppressed += before - kept.len();
            result.replace_findings(kept);
            Self::relabel_if_emptied(result, "all_findings_in_baseline");
        }

        if ctx.frame_results.is_some() {
            ctx.rebuild_findings();
        }
        if suppressed > 0 {
            tracing::info!(suppressed_issues = suppressed, "baseline_applied");
        }
        suppressed
    }

    /// Make the final status agree with the per-frame statuses and
    /// recompute frame counters.
    pub fn ensure_state_consistency(run: &mut PipelineRun) {
        let ctx = &mut run.context;
        if ctx.completed_at.is_none() {
            ctx.completed_at = Some(Utc::now());
        }
        // VALIDATION may have been cut short before aggregating
        if ctx.frame_results.is_some() {
            ctx.rebuild_findings();
        }

        let (mut passed, mut failed, mut skipped) = (0, 0, 0);
        let mut blocker_failed = false;
        for result in ctx.frame_results() {
            match result.status {
                FrameStatus::Passed => passed += 1,
                FrameStatus::Failed => {
                    failed += 1;
                    blocker_failed |= result.is_blocker;
                }
                FrameStatus::Skipped => skipped += 1,
                FrameStatus::Warning | FrameStatus::Error => {}
            }
        }

        let previous = run.status;
        run.status = match previous {
            PipelineStatus::Completed if failed > 0 => PipelineStatus::Failed,
            PipelineStatus::CompletedWithFailures if blocker_failed => PipelineStatus::Failed,
            PipelineStatus::Failed | PipelineStatus::CompletedWithFailures
                if failed == 0 && ctx.errors.is_empty() =>
            {
                PipelineStatus::Completed
            }
            other => other,
        };
        if run.status != previous {
            tracing::warn!(
                pipeline_id = %ctx.pipeline_id,
                previous = %previous,
                corrected = %run.status,
                failed_frames = failed,
                has_blocker = blocker_failed,
                "state_inconsistency_detected"
            );
        }

        if run.status == PipelineStatus::Failed && ctx.errors.is_empty() {
            ctx.add_error(UNEXPLAINED_FAILURE);
        }

        run.frames_passed = passed;
        run.frames_failed = failed;
        run.frames_skipped = skipped;
        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            status = %run.status,
            frames_passed = passed,
            frames_failed = failed,
            "state_consistency_verified"
        );
    }
}
