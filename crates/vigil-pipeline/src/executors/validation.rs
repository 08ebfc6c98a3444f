//! VALIDATION: run the selected frames, tier by tier
//!
//! Frames are grouped by priority (classification's choice, else the
//! frame's own default) and tiers run from critical to low. Each result is
//! stored on the context as soon as its frame finishes, so a run cut short
//! by the pipeline timeout keeps whatever completed.

use super::PhaseExecutor;
use crate::config::ExecutionStrategy;
use crate::context::{Phase, PipelineContext};
use crate::error::{PipelineError, Result};
use crate::frame::{FrameSet, ValidationFrame};
use crate::types::{CodeFile, FramePriority, FrameResult, FrameStatus};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Frame execution phase
#[derive(Debug, Clone)]
pub struct ValidationExecutor {
    frames: FrameSet,
    strategy: ExecutionStrategy,
    parallel_limit: usize,
    frame_timeout: Duration,
}

struct FrameJob {
    frame: Arc<dyn ValidationFrame>,
    files: Vec<CodeFile>,
}

/// Outcome of one frame plus a warning for the context, if any
struct FrameOutcome {
    result: FrameResult,
    warning: Option<String>,
}

impl ValidationExecutor {
    /// Executor over `frames`
    #[must_use]
    pub fn new(frames: FrameSet, strategy: ExecutionStrategy, parallel_limit: usize, frame_timeout: Duration) -> Self {
        Self {
            frames,
            strategy,
            parallel_limit: parallel_limit.max(1),
            frame_timeout,
        }
    }

    fn tiers(&self, ctx: &PipelineContext) -> Vec<(FramePriority, Vec<Arc<dyn ValidationFrame>>)> {
        let mut tiers: IndexMap<FramePriority, Vec<Arc<dyn ValidationFrame>>> =
            FramePriority::ALL.into_iter().map(|p| (p, Vec::new())).collect();
        for id in ctx.selected_frames() {
            let Some(frame) = self.frames.get(id) else {
                tracing::warn!(frame_id = %id, "selected_frame_not_registered");
                continue;
            };
            let tier = ctx
                .frame_priorities
                .as_ref()
                .and_then(|p| p.get(id))
                .copied()
                .unwrap_or_else(|| frame.priority());
            if let Some(bucket) = tiers.get_mut(&tier) {
                bucket.push(Arc::clone(frame));
            }
        }
        tiers.into_iter().filter(|(_, frames)| !frames.is_empty()).collect()
    }

    fn job(ctx: &PipelineContext, frame: Arc<dyn ValidationFrame>) -> std::result::Result<FrameJob, FrameResult> {
        let rules = ctx.suppression_rules.as_deref().unwrap_or_default();
        let files: Vec<CodeFile> = ctx
            .code_files
            .iter()
            .filter(|file| !rules.iter().any(|r| r.suppresses(frame.frame_id(), &file.path)))
            .cloned()
            .collect();

        if files.is_empty() {
            let reason = if ctx.code_files.is_empty() {
                "no input files"
            } else {
                "all files suppressed"
            };
            return Err(FrameResult::skipped(frame.frame_id(), frame.name(), reason)
                .with_blocker(frame.is_blocker()));
        }
        Ok(FrameJob { frame, files })
    }

    async fn run_frame(job: FrameJob, timeout: Duration) -> FrameOutcome {
        let FrameJob { frame, files } = job;
        let started = Instant::now();
        let run = async {
            let mut merged: Option<FrameResult> = None;
            for file in &files {
                let partial = frame.execute(file).await?;
                merged = Some(match merged.take() {
                    Some(mut acc) => {
                        acc.merge(partial);
                        acc
                    }
                    None => partial,
                });
            }
            Ok::<_, PipelineError>(merged)
        };

        let outcome = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(merged)) => FrameOutcome {
                result: merged.unwrap_or_else(|| FrameResult::passed(frame.frame_id(), frame.name())),
                warning: None,
            },
            Ok(Err(e)) => {
                tracing::warn!(frame_id = frame.frame_id(), error = %e, "frame_execution_failed");
                FrameOutcome {
                    result: FrameResult::error(frame.frame_id(), frame.name(), e.to_string()),
                    warning: Some(format!("Frame {} failed: {e}", frame.frame_id())),
                }
            }
            Err(_) => {
                tracing::warn!(frame_id = frame.frame_id(), timeout_secs = timeout.as_secs_f64(), "frame_timeout");
                FrameOutcome {
                    result: FrameResult::timeout(frame.frame_id(), frame.name(), timeout),
                    warning: Some(format!(
                        "Frame {} timed out after {}s",
                        frame.frame_id(),
                        timeout.as_secs_f64()
                    )),
                }
            }
        };

        let mut result = outcome.result;
        result.frame_id = frame.frame_id().to_string();
        result.is_blocker |= frame.is_blocker();
        if result.duration.is_zero() {
            result.duration = started.elapsed();
        }
        FrameOutcome {
            result,
            warning: outcome.warning,
        }
    }

    fn record(ctx: &mut PipelineContext, outcome: FrameOutcome) -> Option<String> {
        let FrameOutcome { result, warning } = outcome;
        if let Some(warning) = warning {
            ctx.add_warning(warning);
        }
        tracing::debug!(
            frame_id = %result.frame_id,
            status = %result.status,
            issues = result.issues_found,
            "frame_completed"
        );
        let blocker_failed = (result.is_blocker && result.status == FrameStatus::Failed)
            .then(|| result.frame_id.clone());
        ctx.insert_frame_result(result);
        blocker_failed
    }
}

#[async_trait]
impl PhaseExecutor for ValidationExecutor {
    fn phase(&self) -> Phase {
        Phase::Validation
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        ctx.frame_results.get_or_insert_with(IndexMap::new);
        let tiers = self.tiers(ctx);
        let mut blocker: Option<String> = None;

        for (tier, frames) in tiers {
            if let Some(failed) = &blocker {
                for frame in frames {
                    let reason = format!("fail_fast: blocker {failed} failed");
                    ctx.insert_frame_result(
                        FrameResult::skipped(frame.frame_id(), frame.name(), reason).with_blocker(frame.is_blocker()),
                    );
                }
                continue;
            }

            tracing::debug!(tier = %tier, frames = frames.len(), "tier_started");
            let mut jobs = Vec::new();
            for frame in frames {
                match Self::job(ctx, frame) {
                    Ok(job) => jobs.push(job),
                    Err(skipped) => ctx.insert_frame_result(skipped),
                }
            }

            let timeout = self.frame_timeout;
            let mut tier_blocker = None;
            if self.strategy.is_concurrent() {
                let mut running = stream::iter(jobs)
                    .map(|job| Self::run_frame(job, timeout))
                    .buffer_unordered(self.parallel_limit);
                while let Some(outcome) = running.next().await {
                    tier_blocker = tier_blocker.or(Self::record(ctx, outcome));
                }
            } else {
                for job in jobs {
                    let outcome = Self::run_frame(job, timeout).await;
                    tier_blocker = tier_blocker.or(Self::record(ctx, outcome));
                }
            }

            if self.strategy == ExecutionStrategy::FailFast {
                if let Some(frame_id) = tier_blocker {
                    tracing::warn!(frame_id = %frame_id, tier = %tier, "fail_fast_triggered");
                    blocker = Some(frame_id);
                }
            }
        }

        ctx.rebuild_findings();
        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            frames = ctx.frame_results().count(),
            findings = ctx.findings().len(),
            "validation_completed"
        );
        match blocker {
            Some(frame_id) => Err(PipelineError::BlockerFailure { frame_id }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Finding, Severity, SuppressionRule};
    use std::collections::BTreeMap;

    struct Rule {
        id: &'static str,
        blocker: bool,
        delay: Duration,
    }

    #[async_trait]
    impl ValidationFrame for Rule {
        fn frame_id(&self) -> &str {
            self.id
        }

        fn is_blocker(&self) -> bool {
            self.blocker
        }

        async fn execute(&self, file: &CodeFile) -> Result<FrameResult> {
            tokio::time::sleep(self.delay).await;
            if file.content.contains("bad") {
                let finding = Finding::new(
                    format!("{}-{}", self.id, file.display_path()),
                    self.id,
                    Severity::High,
                    "bad content",
                    format!("{}:1", file.display_path()),
                );
                return Ok(FrameResult::failed(self.id, self.id, vec![finding]));
            }
            Ok(FrameResult::passed(self.id, self.id))
        }
    }

    fn rule(id: &'static str, blocker: bool, delay_ms: u64) -> Arc<dyn ValidationFrame> {
        Arc::new(Rule {
            id,
            blocker,
            delay: Duration::from_millis(delay_ms),
        })
    }

    fn context(selected: &[&str], priorities: &[(&str, FramePriority)]) -> PipelineContext {
        let mut ctx = PipelineContext::new(
            ".",
            vec![CodeFile::new("src/a.py", "bad"), CodeFile::new("tests/b.py", "ok")],
        );
        ctx.selected_frames = Some(selected.iter().map(ToString::to_string).collect());
        ctx.frame_priorities = Some(
            priorities
                .iter()
                .map(|(id, p)| ((*id).to_string(), *p))
                .collect::<BTreeMap<_, _>>(),
        );
        ctx
    }

    #[tokio::test]
    async fn test_merges_per_file_results() {
        let frames = FrameSet::new().with(rule("naming", false, 0));
        let executor = ValidationExecutor::new(frames, ExecutionStrategy::Sequential, 1, Duration::from_secs(5));
        let mut ctx = context(&["naming"], &[]);
        executor.execute(&mut ctx).await.unwrap();

        let result = &ctx.frame_results.as_ref().unwrap()["naming"];
        assert_eq!(result.status, FrameStatus::Failed);
        assert_eq!(result.issues_found, 1);
        assert_eq!(ctx.findings().len(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_everywhere_is_skipped() {
        let frames = FrameSet::new().with(rule("naming", false, 0));
        let executor = ValidationExecutor::new(frames, ExecutionStrategy::Parallel, 2, Duration::from_secs(5));
        let mut ctx = context(&["naming"], &[]);
        ctx.suppression_rules = Some(vec![SuppressionRule::new("**/*.py", vec![], "generated")]);
        executor.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.frame_results.as_ref().unwrap()["naming"].status, FrameStatus::Skipped);
        assert_eq!(ctx.findings, Some(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_timeout() {
        let frames = FrameSet::new().with(rule("slow", false, 10_000));
        let executor = ValidationExecutor::new(frames, ExecutionStrategy::Parallel, 2, Duration::from_secs(1));
        let mut ctx = context(&["slow"], &[]);
        executor.execute(&mut ctx).await.unwrap();
        let result = &ctx.frame_results.as_ref().unwrap()["slow"];
        assert_eq!(result.status, FrameStatus::Error);
        assert_eq!(result.metadata.get("timeout"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(ctx.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_lower_tiers() {
        let frames = FrameSet::new()
            .with(rule("security", true, 0))
            .with(rule("naming", false, 0));
        let executor = ValidationExecutor::new(frames, ExecutionStrategy::FailFast, 2, Duration::from_secs(5));
        let mut ctx = context(
            &["security", "naming"],
            &[("security", FramePriority::Critical), ("naming", FramePriority::Low)],
        );
        let err = executor.execute(&mut ctx).await.unwrap_err();
        assert!(err.is_blocker());

        let results = ctx.frame_results.as_ref().unwrap();
        assert_eq!(results["security"].status, FrameStatus::Failed);
        assert_eq!(results["naming"].status, FrameStatus::Skipped);
    }

    #[tokio::test]
    async fn test_empty_selection_still_sets_fields() {
        let executor = ValidationExecutor::new(FrameSet::new(), ExecutionStrategy::Sequential, 1, Duration::from_secs(1));
        let mut ctx = PipelineContext::new(".", vec![]);
        executor.execute(&mut ctx).await.unwrap();
        assert!(ctx.assert_phase_complete(Phase::Validation).is_empty());
    }
}
