use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vigil_healing::{MemoryHealingStore, SelfHealingOrchestrator, StrategyRegistry};
use vigil_pipeline::executors::PhaseExecutor;
use vigil_pipeline::{
    ExecutionStrategy, Finding, FindingVerifier, FramePriority, FrameSet, FrameStatus, LlmResponse, Phase,
    PhaseOrchestrator, PhaseState, PipelineConfig, PipelineContext, PipelineError, PipelineStatus,
    ResilienceSettings, Result, Severity,
};
use vigil_test_utils::{
    code_file, ClassifierAnswer, FailingFrame, ScriptedFrame, ScriptedLlm, ScriptedVerifier,
    SlowFrame, StaticClassifier,
};

mock! {
    Verifier {}

    #[async_trait]
    impl FindingVerifier for Verifier {
        async fn verify(&self, findings: &[Finding], context: &PipelineContext) -> Result<HashSet<String>>;
    }
}

fn offline() -> PipelineConfig {
    PipelineConfig::default().with_llm(false)
}

fn overridden(ids: &[&str]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

fn memory_healer() -> Arc<SelfHealingOrchestrator> {
    Arc::new(SelfHealingOrchestrator::new(
        StrategyRegistry::new(),
        Arc::new(MemoryHealingStore::new()),
    ))
}

fn state(run: &vigil_pipeline::PipelineRun, phase: Phase) -> Option<PhaseState> {
    run.checklist.state(phase.as_str())
}

#[tokio::test]
async fn test_full_run_populates_every_phase() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new()
        .with(Arc::new(ScriptedFrame::new("security", "eval(").with_severity(Severity::Critical)))
        .with(Arc::new(ScriptedFrame::new("naming", "zzz")));
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames);

    let run = orchestrator
        .execute(vec![
            code_file("app.py", "x = eval(input())\n"),
            code_file("util.py", "def f():\n    return 1\n"),
        ])
        .await
        .unwrap();

    for phase in Phase::ALL {
        assert_eq!(state(&run, phase), Some(PhaseState::Done), "{phase}");
    }
    assert!(run.context.warnings.is_empty(), "{:?}", run.context.warnings);
    assert_eq!(run.context.selected_frames(), ["security"]);
    assert_eq!(run.status, PipelineStatus::CompletedWithFailures);
    assert_eq!(run.frames_failed, 1);
    assert_eq!(run.context.fortifications.as_ref().map(Vec::len), Some(1));
    assert!(run.context.completed_at.is_some());
    assert!(dir.path().join(".vigil/cache/file_hashes.json").exists());

    let result = run.result();
    assert_eq!(result.total_findings, 1);
    assert_eq!(result.findings_by_severity.get("critical"), Some(&1));
    let json = result.to_json().unwrap();
    assert!(json.contains("\"COMPLETED_WITH_FAILURES\""));
}

#[tokio::test]
async fn test_empty_classifier_answer_selects_all_frames() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new()
        .with(Arc::new(ScriptedFrame::new("security", "zzz")))
        .with(Arc::new(ScriptedFrame::new("naming", "zzz")));
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames)
        .with_classifier(Arc::new(StaticClassifier::selecting(&[])));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(run.context.selected_frames(), ["security", "naming"]);
    assert_eq!(run.status, PipelineStatus::Completed);
    assert_eq!(run.frames_passed, 2);
}

#[tokio::test]
async fn test_unchanged_files_are_hidden_from_classifier() {
    let dir = tempfile::tempdir().unwrap();
    let frames = || {
        FrameSet::new()
            .with(Arc::new(ScriptedFrame::new("security", "zzz")))
            .with(Arc::new(ScriptedFrame::new("naming", "zzz")))
    };

    PhaseOrchestrator::new(offline(), dir.path(), frames())
        .execute(vec![code_file("a.py", "x = 1\n"), code_file("b.py", "y = 1\n")])
        .await
        .unwrap();

    let classifier = Arc::new(StaticClassifier::selecting(&["naming"]));
    let run = PhaseOrchestrator::new(offline(), dir.path(), frames())
        .with_classifier(classifier.clone())
        .execute(vec![code_file("a.py", "x = 1\n"), code_file("b.py", "y = 2\n")])
        .await
        .unwrap();

    assert_eq!(classifier.seen(), vec![vec!["b.py".to_string()]]);
    assert_eq!(run.context.selected_frames(), ["naming"]);
    let reasoning = run.context.classification_reasoning.unwrap();
    assert!(reasoning.contains("skipped unchanged files: a.py"), "{reasoning}");
}

#[tokio::test]
async fn test_all_unchanged_selects_every_frame_without_classifying() {
    let dir = tempfile::tempdir().unwrap();
    let frames = || {
        FrameSet::new()
            .with(Arc::new(ScriptedFrame::new("security", "zzz")))
            .with(Arc::new(ScriptedFrame::new("naming", "zzz")))
    };
    let files = || vec![code_file("a.py", "x = 1\n")];

    PhaseOrchestrator::new(offline(), dir.path(), frames())
        .execute(files())
        .await
        .unwrap();

    let classifier = Arc::new(StaticClassifier::selecting(&["naming"]));
    let run = PhaseOrchestrator::new(offline(), dir.path(), frames())
        .with_classifier(classifier.clone())
        .execute(files())
        .await
        .unwrap();

    assert!(classifier.seen().is_empty());
    assert_eq!(run.context.selected_frames(), ["security", "naming"]);
    assert!(run
        .context
        .classification_reasoning
        .as_deref()
        .is_some_and(|r| r.starts_with("skipped")));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_partial_results() {
    let frames = FrameSet::new()
        .with(Arc::new(ScriptedFrame::new("security", "x").with_priority(FramePriority::Critical)))
        .with(Arc::new(SlowFrame::new("slow", Duration::from_secs(10))));
    let config = offline()
        .with_incremental(false)
        .with_baseline(false)
        .with_strategy(ExecutionStrategy::Sequential)
        .with_timeout(Duration::from_secs(1));
    let orchestrator = PhaseOrchestrator::new(config, ".", frames)
        .with_frame_override(overridden(&["security", "slow"]));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(run.status, PipelineStatus::Failed);
    assert!(run
        .context
        .errors
        .contains(&"Pipeline execution timeout after 1s".to_string()));
    let results = run.context.frame_results.as_ref().unwrap();
    assert_eq!(results["security"].status, FrameStatus::Failed);
    assert!(!results.contains_key("slow"));
    assert_eq!(run.frames_failed, 1);
    assert_eq!(run.context.findings().len(), 1);
    let summary = run.result();
    assert_eq!(summary.total_findings, 1);
    assert_eq!(summary.findings_by_severity.get("high"), Some(&1));
    assert_eq!(state(&run, Phase::Validation), Some(PhaseState::Failed));
    assert_eq!(state(&run, Phase::Fortification), Some(PhaseState::Skipped));
    assert_eq!(state(&run, Phase::Cleaning), Some(PhaseState::Skipped));
}

#[tokio::test]
async fn test_fail_fast_stops_after_blocker_tier() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(
        ScriptedFrame::new("security", "eval(")
            .with_priority(FramePriority::Critical)
            .blocker(),
    );
    let naming = Arc::new(ScriptedFrame::new("naming", "x").with_priority(FramePriority::Low));
    let frames = FrameSet::new().with(gate.clone()).with(naming.clone());
    let config = offline().with_strategy(ExecutionStrategy::FailFast);
    let orchestrator = PhaseOrchestrator::new(config, dir.path(), frames)
        .with_frame_override(overridden(&["security", "naming"]));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = eval(y)\n")])
        .await
        .unwrap();

    assert_eq!(run.status, PipelineStatus::Failed);
    assert_eq!(naming.calls(), 0);
    let results = run.context.frame_results.as_ref().unwrap();
    assert_eq!(results["security"].status, FrameStatus::Failed);
    assert_eq!(results["naming"].status, FrameStatus::Skipped);
    assert!(run.context.errors[0].contains("blocker frame security failed"), "{:?}", run.context.errors);
    assert_eq!(state(&run, Phase::Validation), Some(PhaseState::Failed));
    assert_eq!(state(&run, Phase::Fortification), Some(PhaseState::Skipped));
    assert_eq!(state(&run, Phase::Cleaning), Some(PhaseState::Skipped));
    assert!(run.context.fortifications.is_none());
}

#[tokio::test]
async fn test_classification_error_aborts_with_partial_run() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("security", "zzz")));
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames).with_classifier(Arc::new(
        StaticClassifier::new(ClassifierAnswer::Fail("model exploded".into())),
    ));

    let err = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap_err();

    match err {
        PipelineError::Aborted { reason, run } => {
            assert!(reason.contains("model exploded"));
            assert_eq!(run.status, PipelineStatus::Failed);
            assert!(run.context.errors[0].starts_with("CLASSIFICATION failed"));
            assert_eq!(state(&run, Phase::Analysis), Some(PhaseState::Done));
            assert_eq!(state(&run, Phase::Classification), Some(PhaseState::Failed));
            assert_eq!(state(&run, Phase::Validation), Some(PhaseState::Skipped));
            assert!(run.context.frame_results.is_none());
        }
        other => panic!("expected abort, got {other}"),
    }
}

#[tokio::test]
async fn test_absent_classifier_answer_falls_back_to_heuristic() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new()
        .with(Arc::new(ScriptedFrame::new("security", "zzz")))
        .with(Arc::new(ScriptedFrame::new("naming", "zzz")));
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames)
        .with_classifier(Arc::new(StaticClassifier::new(ClassifierAnswer::Absent)));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(run.context.selected_frames(), ["security"]);
    assert!(run
        .context
        .classification_reasoning
        .as_deref()
        .is_some_and(|r| r.starts_with("heuristic")));
}

#[tokio::test]
async fn test_frame_override_skips_classification() {
    let dir = tempfile::tempdir().unwrap();
    let naming = Arc::new(ScriptedFrame::new("naming", "zzz"));
    let frames = FrameSet::new()
        .with(Arc::new(ScriptedFrame::new("security", "zzz")))
        .with(naming.clone());
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames)
        .with_frame_override(overridden(&["naming", "ghost", "naming"]));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(run.context.selected_frames(), ["naming"]);
    assert_eq!(naming.calls(), 1);
    assert_eq!(state(&run, Phase::Classification), Some(PhaseState::Skipped));
    assert_eq!(
        run.context.classification_reasoning.as_deref(),
        Some(vigil_pipeline::orchestrator::MANUAL_OVERRIDE_REASONING)
    );
    assert_eq!(run.context.warnings, vec!["Frame override names unknown frame 'ghost'".to_string()]);
}

#[tokio::test]
async fn test_disabled_phase_is_skipped_without_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("security", "zzz")));
    let config = offline().with_phase(Phase::Triage, false);
    let orchestrator = PhaseOrchestrator::new(config, dir.path(), frames);

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(state(&run, Phase::Triage), Some(PhaseState::Skipped));
    assert!(run.context.triage_decisions.is_none());
    assert!(run.context.warnings.is_empty());
    assert_eq!(run.status, PipelineStatus::Completed);
}

#[derive(Debug)]
struct IdleAnalysis;

#[async_trait]
impl PhaseExecutor for IdleAnalysis {
    fn phase(&self) -> Phase {
        Phase::Analysis
    }

    async fn execute(&self, _ctx: &mut PipelineContext) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct BrokenTriage;

#[async_trait]
impl PhaseExecutor for BrokenTriage {
    fn phase(&self) -> Phase {
        Phase::Triage
    }

    async fn execute(&self, _ctx: &mut PipelineContext) -> Result<()> {
        Err(PipelineError::Llm("triage model down".into()))
    }
}

#[tokio::test]
async fn test_missing_postconditions_become_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("security", "zzz")));
    let orchestrator =
        PhaseOrchestrator::new(offline(), dir.path(), frames).with_executor(Arc::new(IdleAnalysis));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(run.context.warnings.len(), 2);
    assert!(run.context.warnings.iter().all(|w| w.contains("ANALYSIS")));
    assert!(run.context.warnings.iter().any(|w| w.contains("quality_metrics")));
    assert!(run.context.warnings.iter().any(|w| w.contains("hotspots")));
    assert_eq!(state(&run, Phase::Cleaning), Some(PhaseState::Done));
    assert_eq!(run.status, PipelineStatus::Completed);
}

#[tokio::test]
async fn test_executor_error_is_recorded_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("security", "zzz")));
    let orchestrator =
        PhaseOrchestrator::new(offline(), dir.path(), frames).with_executor(Arc::new(BrokenTriage));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(
        run.context.errors,
        vec!["TRIAGE failed: llm error: triage model down".to_string()]
    );
    assert!(run.context.warnings.iter().any(|w| w.contains("triage_decisions")));
    assert_eq!(state(&run, Phase::Triage), Some(PhaseState::Failed));
    assert_eq!(state(&run, Phase::Cleaning), Some(PhaseState::Done));
    assert_eq!(run.status, PipelineStatus::Failed);
}

#[tokio::test]
async fn test_frame_error_does_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let naming = Arc::new(ScriptedFrame::new("naming", "zzz"));
    let frames = FrameSet::new()
        .with(Arc::new(FailingFrame::new("broken")))
        .with(naming.clone());
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames)
        .with_frame_override(overridden(&["broken", "naming"]));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    let results = run.context.frame_results.as_ref().unwrap();
    assert_eq!(results["broken"].status, FrameStatus::Error);
    assert_eq!(results["naming"].status, FrameStatus::Passed);
    assert_eq!(naming.calls(), 1);
    assert!(run.context.warnings.iter().any(|w| w.starts_with("Frame broken failed")));
    assert_eq!(run.status, PipelineStatus::Completed);
}

#[tokio::test]
async fn test_verifier_rejections_relabel_frame() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("naming", "x")));
    let mut verifier = MockVerifier::new();
    verifier
        .expect_verify()
        .times(1)
        .returning(|_, _| Ok(HashSet::new()));
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames)
        .with_frame_override(overridden(&["naming"]))
        .with_verifier(Arc::new(verifier));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\nx = 2\n")])
        .await
        .unwrap();

    assert_eq!(run.context.false_positives.len(), 2);
    assert!(run.context.findings().is_empty());
    let results = run.context.frame_results.as_ref().unwrap();
    assert_eq!(results["naming"].status, FrameStatus::Passed);
    assert_eq!(run.status, PipelineStatus::Completed);
}

#[tokio::test]
async fn test_verifier_keeps_confirmed_findings() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("naming", "x")));
    let verifier = Arc::new(ScriptedVerifier::confirming(&["naming:a.py:1"]));
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames)
        .with_frame_override(overridden(&["naming"]))
        .with_verifier(verifier.clone());

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\nx = 2\n")])
        .await
        .unwrap();

    assert_eq!(verifier.calls(), 1);
    assert_eq!(run.context.false_positives, vec!["naming:a.py:2".to_string()]);
    let results = run.context.frame_results.as_ref().unwrap();
    assert_eq!(results["naming"].issues_found, 1);
    assert_eq!(results["naming"].status, FrameStatus::Failed);
    assert_eq!(run.status, PipelineStatus::CompletedWithFailures);
}

#[tokio::test]
async fn test_failing_verifier_keeps_findings() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("naming", "x")));
    let verifier = Arc::new(ScriptedVerifier::failing());
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames)
        .with_frame_override(overridden(&["naming"]))
        .with_verifier(verifier.clone());

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(verifier.calls(), 1);
    assert_eq!(run.context.findings().len(), 1);
    assert!(run.context.false_positives.is_empty());
}

fn write_baseline(root: &Path, body: &str) {
    let path = root.join(".vigil/baseline.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

#[tokio::test]
async fn test_baseline_suppresses_known_issues() {
    let dir = tempfile::tempdir().unwrap();
    write_baseline(
        dir.path(),
        r#"{"frame_results": [{"findings": [{"rule_id": "naming-rule", "file_path": "a.py"}]}]}"#,
    );
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("naming", "x")));
    let orchestrator = PhaseOrchestrator::new(offline(), dir.path(), frames)
        .with_frame_override(overridden(&["naming"]));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n"), code_file("b.py", "y = 1\n")])
        .await
        .unwrap();

    assert!(run.context.findings().is_empty());
    let results = run.context.frame_results.as_ref().unwrap();
    assert_eq!(results["naming"].status, FrameStatus::Passed);
    assert_eq!(run.status, PipelineStatus::Completed);
}

#[tokio::test]
async fn test_baseline_disabled_keeps_findings() {
    let dir = tempfile::tempdir().unwrap();
    write_baseline(
        dir.path(),
        r#"{"frame_results": [{"findings": [{"rule_id": "naming-rule", "file_path": "a.py"}]}]}"#,
    );
    let frames = FrameSet::new().with(Arc::new(ScriptedFrame::new("naming", "x")));
    let orchestrator = PhaseOrchestrator::new(offline().with_baseline(false), dir.path(), frames)
        .with_frame_override(overridden(&["naming"]));

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(run.context.findings().len(), 1);
    assert_eq!(run.status, PipelineStatus::CompletedWithFailures);
}

#[tokio::test]
async fn test_llm_classification_drives_selection() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new()
        .with(Arc::new(ScriptedFrame::new("security", "zzz")))
        .with(Arc::new(ScriptedFrame::new("naming", "zzz")));
    let llm = Arc::new(ScriptedLlm::always(LlmResponse::ok(
        r#"{"selected_frames": ["naming"], "reasoning": "model says naming"}"#,
    )));
    let orchestrator = PhaseOrchestrator::new(PipelineConfig::default(), dir.path(), frames)
        .with_llm(llm.clone())
        .with_healer(memory_healer());

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(llm.request_count(), 1);
    assert_eq!(run.context.selected_frames(), ["naming"]);
    assert_eq!(run.context.classification_reasoning.as_deref(), Some("model says naming"));
}

#[tokio::test]
async fn test_llm_failure_falls_back_to_heuristic() {
    let dir = tempfile::tempdir().unwrap();
    let frames = FrameSet::new()
        .with(Arc::new(ScriptedFrame::new("security", "zzz")))
        .with(Arc::new(ScriptedFrame::new("naming", "zzz")));
    let llm = Arc::new(ScriptedLlm::always(LlmResponse::failure("HTTP 503")));
    let resilience = ResilienceSettings {
        max_attempts: 1,
        ..ResilienceSettings::default()
    };
    let config = PipelineConfig::default().with_resilience(resilience);
    let orchestrator = PhaseOrchestrator::new(config, dir.path(), frames)
        .with_llm(llm.clone())
        .with_healer(memory_healer());

    let run = orchestrator
        .execute(vec![code_file("a.py", "x = 1\n")])
        .await
        .unwrap();

    assert_eq!(llm.request_count(), 1);
    assert_eq!(run.context.selected_frames(), ["security"]);
    assert!(run.context.errors.is_empty());
    assert_eq!(run.status, PipelineStatus::Completed);
}
